use crate::domain::model::{AllocationScope, PortType};
use crate::domain::ports::RegistryStore;
use crate::utils::error::{RegistryError, Result};
use std::sync::Arc;

/// 閉區間 [lower, upper]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBounds {
    pub lower: u16,
    pub upper: u16,
}

impl PortBounds {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.lower && port <= self.upper
    }
}

/// 編譯期內建的預設範圍，每個 PortType 都必須有值
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRanges;

impl DefaultRanges {
    pub fn bounds(&self, port_type: PortType) -> PortBounds {
        let (lower, upper) = match port_type {
            PortType::HttpApi => (8080, 8199),
            PortType::FrontendDev => (3000, 3199),
            PortType::Database => (5432, 5499),
            PortType::Redis => (6379, 6399),
            PortType::Kafka => (9092, 9099),
            PortType::KafkaInternal => (29092, 29099),
            PortType::Zookeeper => (2181, 2199),
            PortType::Grpc => (50051, 50099),
            PortType::Websocket => (8700, 8799),
            PortType::Debug => (5005, 5099),
            PortType::Actuator => (9200, 9299),
            PortType::Custom => (10000, 19999),
        };
        PortBounds { lower, upper }
    }

    /// 啟動時檢查整張表；失敗代表建置錯誤，不是請求錯誤
    pub fn validate(&self) -> Result<()> {
        for port_type in PortType::ALL {
            let bounds = self.bounds(port_type);
            if bounds.lower > bounds.upper {
                return Err(RegistryError::InvalidRange {
                    context: format!("default {}", port_type),
                    start: bounds.lower,
                    end: bounds.upper,
                });
            }
        }
        Ok(())
    }
}

/// 決定某個分配範圍適用的連接埠上下界
pub struct ScopeResolver<S: RegistryStore> {
    store: Arc<S>,
    defaults: DefaultRanges,
}

impl<S: RegistryStore> ScopeResolver<S> {
    pub fn new(store: Arc<S>, defaults: DefaultRanges) -> Self {
        Self { store, defaults }
    }

    pub async fn resolve(&self, scope: &AllocationScope) -> Result<PortBounds> {
        let stored = self
            .store
            .port_range(&scope.team_id, scope.port_type, &scope.environment)
            .await?;

        match stored {
            Some(range) if range.range_start > range.range_end => Err(RegistryError::InvalidRange {
                context: scope.to_string(),
                start: range.range_start,
                end: range.range_end,
            }),
            Some(range) => {
                tracing::debug!(
                    "Using team range [{}, {}] for {}",
                    range.range_start,
                    range.range_end,
                    scope
                );
                Ok(PortBounds {
                    lower: range.range_start,
                    upper: range.range_end,
                })
            }
            None => Ok(self.defaults.bounds(scope.port_type)),
        }
    }
}
