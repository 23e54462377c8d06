use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// 團隊識別碼，由呼叫端提供，引擎不驗證其存在
    TeamId
);
string_id!(
    /// 服務識別碼；升冪排序是所有決定性排序的依據
    ServiceId
);
string_id!(SolutionId);
string_id!(
    /// 環境名稱 (dev, staging, ...)，視為分區鍵
    Environment
);

/// 連接埠類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
    HttpApi,
    FrontendDev,
    Database,
    Redis,
    Kafka,
    KafkaInternal,
    Zookeeper,
    Grpc,
    Websocket,
    Debug,
    Actuator,
    Custom,
}

impl PortType {
    pub const ALL: [PortType; 12] = [
        PortType::HttpApi,
        PortType::FrontendDev,
        PortType::Database,
        PortType::Redis,
        PortType::Kafka,
        PortType::KafkaInternal,
        PortType::Zookeeper,
        PortType::Grpc,
        PortType::Websocket,
        PortType::Debug,
        PortType::Actuator,
        PortType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortType::HttpApi => "HTTP_API",
            PortType::FrontendDev => "FRONTEND_DEV",
            PortType::Database => "DATABASE",
            PortType::Redis => "REDIS",
            PortType::Kafka => "KAFKA",
            PortType::KafkaInternal => "KAFKA_INTERNAL",
            PortType::Zookeeper => "ZOOKEEPER",
            PortType::Grpc => "GRPC",
            PortType::Websocket => "WEBSOCKET",
            PortType::Debug => "DEBUG",
            PortType::Actuator => "ACTUATOR",
            PortType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        PortType::ALL
            .into_iter()
            .find(|port_type| port_type.as_str() == normalized)
            .ok_or_else(|| format!("Unknown port type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// 服務間依賴的種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    HttpRest,
    Grpc,
    KafkaTopic,
    DatabaseShared,
    RedisShared,
    Library,
    GatewayRoute,
    Websocket,
    FileSystem,
    Other,
}

impl DependencyType {
    pub const ALL: [DependencyType; 10] = [
        DependencyType::HttpRest,
        DependencyType::Grpc,
        DependencyType::KafkaTopic,
        DependencyType::DatabaseShared,
        DependencyType::RedisShared,
        DependencyType::Library,
        DependencyType::GatewayRoute,
        DependencyType::Websocket,
        DependencyType::FileSystem,
        DependencyType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::HttpRest => "HTTP_REST",
            DependencyType::Grpc => "GRPC",
            DependencyType::KafkaTopic => "KAFKA_TOPIC",
            DependencyType::DatabaseShared => "DATABASE_SHARED",
            DependencyType::RedisShared => "REDIS_SHARED",
            DependencyType::Library => "LIBRARY",
            DependencyType::GatewayRoute => "GATEWAY_ROUTE",
            DependencyType::Websocket => "WEBSOCKET",
            DependencyType::FileSystem => "FILE_SYSTEM",
            DependencyType::Other => "OTHER",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        DependencyType::ALL
            .into_iter()
            .find(|dependency_type| dependency_type.as_str() == normalized)
            .ok_or_else(|| format!("Unknown dependency type: {}", s))
    }
}

/// 連接埠分配的唯一性範圍 (team, environment, port_type)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationScope {
    pub team_id: TeamId,
    pub environment: Environment,
    pub port_type: PortType,
}

impl AllocationScope {
    pub fn new(team_id: TeamId, environment: Environment, port_type: PortType) -> Self {
        Self {
            team_id,
            environment,
            port_type,
        }
    }
}

impl fmt::Display for AllocationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.team_id, self.environment, self.port_type)
    }
}

/// 團隊自訂的連接埠範圍，閉區間
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub team_id: TeamId,
    pub port_type: PortType,
    pub environment: Environment,
    pub range_start: u16,
    pub range_end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub id: u64,
    pub service_id: ServiceId,
    pub environment: Environment,
    pub port_type: PortType,
    pub port_number: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub is_auto_allocated: bool,
    #[serde(default)]
    pub allocated_by: String,
    #[serde(default = "Utc::now")]
    pub allocated_at: DateTime<Utc>,
}

/// 尚未寫入的連接埠分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortClaim {
    pub environment: Environment,
    pub port_type: PortType,
    pub port_number: u16,
    pub protocol: Protocol,
    pub is_auto_allocated: bool,
    pub allocated_by: String,
}

impl PortClaim {
    pub fn scope(&self, team_id: &TeamId) -> AllocationScope {
        AllocationScope::new(team_id.clone(), self.environment.clone(), self.port_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub team_id: TeamId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub team_id: TeamId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub id: SolutionId,
    pub team_id: TeamId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSolution {
    pub team_id: TeamId,
    pub name: String,
    pub slug: String,
}

/// 有向依賴邊：source 依賴 target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source_service_id: ServiceId,
    pub target_service_id: ServiceId,
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source_service_id.clone(),
            target: self.target_service_id.clone(),
            dependency_type: self.dependency_type,
        }
    }
}

/// (source, target, dependency_type)，每組至多一條邊
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub source: ServiceId,
    pub target: ServiceId,
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDependency {
    pub source_service_id: ServiceId,
    pub target_service_id: ServiceId,
    pub dependency_type: DependencyType,
    pub is_required: bool,
}

/// slug 的唯一性範圍種類，兩者皆以團隊為範圍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlugKind {
    Service,
    Solution,
}

impl fmt::Display for SlugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlugKind::Service => f.write_str("service"),
            SlugKind::Solution => f.write_str("solution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_type_parsing() {
        assert_eq!("HTTP_API".parse::<PortType>().unwrap(), PortType::HttpApi);
        assert_eq!("kafka-internal".parse::<PortType>().unwrap(), PortType::KafkaInternal);
        assert!("ftp".parse::<PortType>().is_err());
    }

    #[test]
    fn test_dependency_type_serde_names() {
        let json = serde_json::to_string(&DependencyType::HttpRest).unwrap();
        assert_eq!(json, "\"HTTP_REST\"");
        for dependency_type in DependencyType::ALL {
            let parsed: DependencyType = dependency_type.as_str().parse().unwrap();
            assert_eq!(parsed, dependency_type);
        }
    }

    #[test]
    fn test_scope_display() {
        let scope = AllocationScope::new(TeamId::from("core"), Environment::from("dev"), PortType::Grpc);
        assert_eq!(scope.to_string(), "core/dev/GRPC");
    }
}
