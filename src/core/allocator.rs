use crate::config::engine_config::AllocationConfig;
use crate::core::locks::KeyedLocks;
use crate::core::scope::{DefaultRanges, PortBounds, ScopeResolver};
use crate::domain::model::{
    AllocationScope, Environment, PortAllocation, PortClaim, PortType, Protocol, ServiceId,
    ServiceRecord, TeamId,
};
use crate::domain::ports::{PortExclusivity, RegistryStore};
use crate::utils::error::{Constraint, RegistryError, Result, StoreError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// 註冊時的連接埠需求；`port` 為空代表自動分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    pub environment: Environment,
    pub port_type: PortType,
    pub port: Option<u16>,
    pub protocol: Protocol,
}

impl PortRequest {
    pub fn auto(environment: impl Into<Environment>, port_type: PortType) -> Self {
        Self {
            environment: environment.into(),
            port_type,
            port: None,
            protocol: Protocol::default(),
        }
    }

    pub fn manual(environment: impl Into<Environment>, port_type: PortType, port: u16) -> Self {
        Self {
            environment: environment.into(),
            port_type,
            port: Some(port),
            protocol: Protocol::default(),
        }
    }
}

/// 範圍內最小的未使用連接埠
pub fn lowest_free(bounds: PortBounds, taken: &BTreeSet<u16>) -> Option<u16> {
    (bounds.lower..=bounds.upper).find(|port| !taken.contains(port))
}

pub struct PortAllocator<S: RegistryStore> {
    store: Arc<S>,
    resolver: ScopeResolver<S>,
    locks: Arc<KeyedLocks<AllocationScope>>,
    max_attempts: u32,
    allow_shared_manual_ports: bool,
}

impl<S: RegistryStore> PortAllocator<S> {
    pub fn new(
        store: Arc<S>,
        defaults: DefaultRanges,
        locks: Arc<KeyedLocks<AllocationScope>>,
        config: &AllocationConfig,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(store.clone(), defaults),
            store,
            locks,
            max_attempts: config.max_attempts,
            allow_shared_manual_ports: config.allow_shared_manual_ports,
        }
    }

    pub fn resolver(&self) -> &ScopeResolver<S> {
        &self.resolver
    }

    async fn service_scope(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_type: PortType,
    ) -> Result<(ServiceRecord, AllocationScope)> {
        let service = self
            .store
            .service(service_id)
            .await?
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.clone()))?;
        let scope = AllocationScope::new(service.team_id.clone(), environment.clone(), port_type);
        Ok((service, scope))
    }

    /// 範圍內已被占用的連接埠，對應到持有的服務
    async fn holders_in_scope(&self, scope: &AllocationScope) -> Result<BTreeMap<u16, ServiceId>> {
        let allocations = self.store.allocations_in_scope(scope).await?;
        Ok(allocations
            .into_iter()
            .map(|allocation| (allocation.port_number, allocation.service_id))
            .collect())
    }

    /// 該服務在同一環境已使用的連接埠 (跨類型)
    async fn service_ports(&self, service_id: &ServiceId, environment: &Environment) -> Result<BTreeSet<u16>> {
        let allocations = self.store.allocations_for_service(service_id).await?;
        Ok(allocations
            .into_iter()
            .filter(|allocation| &allocation.environment == environment)
            .map(|allocation| allocation.port_number)
            .collect())
    }

    /// 自動分配範圍內最小的可用連接埠
    pub async fn allocate_auto(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_type: PortType,
        allocated_by: &str,
    ) -> Result<PortAllocation> {
        let (_, scope) = self.service_scope(service_id, environment, port_type).await?;
        let _guard = self.locks.acquire(&scope).await?;

        for attempt in 1..=self.max_attempts {
            let bounds = self.resolver.resolve(&scope).await?;
            let mut taken: BTreeSet<u16> = self.holders_in_scope(&scope).await?.into_keys().collect();
            taken.extend(self.service_ports(service_id, environment).await?);

            let port = lowest_free(bounds, &taken).ok_or_else(|| RegistryError::RangeExhausted {
                scope: scope.clone(),
                lower: bounds.lower,
                upper: bounds.upper,
            })?;

            let claim = PortClaim {
                environment: environment.clone(),
                port_type,
                port_number: port,
                protocol: Protocol::default(),
                is_auto_allocated: true,
                allocated_by: allocated_by.to_string(),
            };

            match self
                .store
                .insert_allocations(service_id, vec![claim], PortExclusivity::Scope)
                .await
            {
                Ok(mut inserted) => {
                    tracing::info!("Allocated port {} to {} in {}", port, service_id, scope);
                    return inserted.pop().ok_or_else(|| {
                        RegistryError::Store(StoreError::Unavailable(
                            "insert returned no allocation".to_string(),
                        ))
                    });
                }
                Err(StoreError::UniqueViolation { constraint }) => {
                    tracing::warn!(
                        "Port {} in {} lost a race ({}), attempt {}/{}",
                        port,
                        scope,
                        constraint,
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::AllocationContention {
            resource: scope.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// 手動保留指定連接埠
    pub async fn allocate_port(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_type: PortType,
        requested_port: u16,
        allocated_by: &str,
    ) -> Result<PortAllocation> {
        let (_, scope) = self.service_scope(service_id, environment, port_type).await?;
        let _guard = self.locks.acquire(&scope).await?;

        let bounds = self.resolver.resolve(&scope).await?;
        if !bounds.contains(requested_port) {
            return Err(RegistryError::OutOfRange {
                scope,
                port: requested_port,
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }

        self.ensure_free(&scope, service_id, requested_port).await?;
        if self.service_ports(service_id, environment).await?.contains(&requested_port) {
            return Err(RegistryError::PortConflict {
                scope,
                port: requested_port,
                holder: service_id.clone(),
            });
        }

        let claim = PortClaim {
            environment: environment.clone(),
            port_type,
            port_number: requested_port,
            protocol: Protocol::default(),
            is_auto_allocated: false,
            allocated_by: allocated_by.to_string(),
        };

        match self
            .store
            .insert_allocations(service_id, vec![claim], self.manual_exclusivity())
            .await
        {
            Ok(mut inserted) => {
                tracing::info!("Reserved port {} for {} in {}", requested_port, service_id, scope);
                inserted.pop().ok_or_else(|| {
                    RegistryError::Store(StoreError::Unavailable("insert returned no allocation".to_string()))
                })
            }
            Err(StoreError::UniqueViolation { constraint }) => {
                // 另一個寫入者搶先了；重新讀取以回報實際持有者
                let holder = match constraint {
                    Constraint::ServicePort => service_id.clone(),
                    _ => self
                        .holders_in_scope(&scope)
                        .await?
                        .remove(&requested_port)
                        .unwrap_or_else(|| service_id.clone()),
                };
                Err(RegistryError::PortConflict {
                    scope,
                    port: requested_port,
                    holder,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn manual_exclusivity(&self) -> PortExclusivity {
        if self.allow_shared_manual_ports {
            PortExclusivity::ServiceOnly
        } else {
            PortExclusivity::Scope
        }
    }

    async fn ensure_free(&self, scope: &AllocationScope, claimant: &ServiceId, port: u16) -> Result<()> {
        if self.allow_shared_manual_ports {
            return Ok(());
        }
        match self.holders_in_scope(scope).await?.remove(&port) {
            Some(holder) => Err(RegistryError::PortConflict {
                scope: scope.clone(),
                port,
                holder,
            }),
            None => {
                tracing::debug!("Port {} is free in {} for {}", port, scope, claimant);
                Ok(())
            }
        }
    }

    /// 釋放一筆分配；不存在時視為成功。回傳是否真的刪除
    pub async fn release(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_number: u16,
    ) -> Result<bool> {
        let Some(service) = self.store.service(service_id).await? else {
            tracing::debug!("Release for unknown service {} is a no-op", service_id);
            return Ok(false);
        };

        let existing = self
            .store
            .allocations_for_service(service_id)
            .await?
            .into_iter()
            .find(|allocation| &allocation.environment == environment && allocation.port_number == port_number);

        let Some(allocation) = existing else {
            tracing::debug!(
                "No allocation of port {} for {} in {}, nothing to release",
                port_number,
                service_id,
                environment
            );
            return Ok(false);
        };

        let scope = AllocationScope::new(service.team_id, environment.clone(), allocation.port_type);
        let _guard = self.locks.acquire(&scope).await?;
        let removed = self
            .store
            .delete_allocation(service_id, environment, port_number)
            .await?;
        if removed {
            tracing::info!("Released port {} of {} in {}", port_number, service_id, scope);
        }
        Ok(removed)
    }

    /// 釋放服務的所有分配，回傳釋放數量
    pub async fn release_service(&self, service_id: &ServiceId) -> Result<usize> {
        let allocations = self.store.allocations_for_service(service_id).await?;
        let mut released = 0;
        for allocation in allocations {
            if self
                .release(service_id, &allocation.environment, allocation.port_number)
                .await?
            {
                released += 1;
            }
        }
        Ok(released)
    }

    /// 唯讀檢查：範圍外回報 OutOfRange，已被占用回傳 false
    pub async fn check_available(&self, scope: &AllocationScope, port: u16) -> Result<bool> {
        let bounds = self.resolver.resolve(scope).await?;
        if !bounds.contains(port) {
            return Err(RegistryError::OutOfRange {
                scope: scope.clone(),
                port,
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }
        Ok(!self.holders_in_scope(scope).await?.contains_key(&port))
    }

    /// 團隊在某環境的所有分配，依類型分組、依連接埠排序
    pub async fn port_map(
        &self,
        team_id: &TeamId,
        environment: &Environment,
    ) -> Result<BTreeMap<PortType, Vec<PortAllocation>>> {
        let mut map = BTreeMap::new();
        for port_type in PortType::ALL {
            let scope = AllocationScope::new(team_id.clone(), environment.clone(), port_type);
            let mut allocations = self.store.allocations_in_scope(&scope).await?;
            if allocations.is_empty() {
                continue;
            }
            allocations.sort_by_key(|allocation| allocation.port_number);
            map.insert(port_type, allocations);
        }
        Ok(map)
    }

    /// 為尚未建立的服務規劃所有連接埠；呼叫者必須已持有所有相關範圍的鎖
    pub(crate) async fn plan_claims(
        &self,
        team_id: &TeamId,
        claimant: &ServiceId,
        requests: &[PortRequest],
        allocated_by: &str,
    ) -> Result<Vec<PortClaim>> {
        let mut scope_taken: HashMap<AllocationScope, BTreeSet<u16>> = HashMap::new();
        // 同一服務在同一環境不可重複使用連接埠
        let mut env_planned: HashMap<Environment, BTreeSet<u16>> = HashMap::new();
        let mut claims = Vec::with_capacity(requests.len());

        for request in requests {
            let scope = AllocationScope::new(team_id.clone(), request.environment.clone(), request.port_type);
            let bounds = self.resolver.resolve(&scope).await?;

            if !scope_taken.contains_key(&scope) {
                let holders = self.holders_in_scope(&scope).await?;
                scope_taken.insert(scope.clone(), holders.into_keys().collect());
            }
            let planned = env_planned.entry(request.environment.clone()).or_default();
            let taken = scope_taken.entry(scope.clone()).or_default();

            let (port, is_auto_allocated) = match request.port {
                None => {
                    let blocked: BTreeSet<u16> = taken.union(planned).copied().collect();
                    let port = lowest_free(bounds, &blocked).ok_or_else(|| RegistryError::RangeExhausted {
                        scope: scope.clone(),
                        lower: bounds.lower,
                        upper: bounds.upper,
                    })?;
                    (port, true)
                }
                Some(port) => {
                    if !bounds.contains(port) {
                        return Err(RegistryError::OutOfRange {
                            scope,
                            port,
                            lower: bounds.lower,
                            upper: bounds.upper,
                        });
                    }
                    if planned.contains(&port) {
                        return Err(RegistryError::PortConflict {
                            scope,
                            port,
                            holder: claimant.clone(),
                        });
                    }
                    // 註冊時一律排他；共用連接埠只能之後透過 allocate_port 取得
                    if taken.contains(&port) {
                        let holder = self
                            .holders_in_scope(&scope)
                            .await?
                            .remove(&port)
                            .unwrap_or_else(|| claimant.clone());
                        return Err(RegistryError::PortConflict { scope, port, holder });
                    }
                    (port, false)
                }
            };

            taken.insert(port);
            planned.insert(port);
            claims.push(PortClaim {
                environment: request.environment.clone(),
                port_type: request.port_type,
                port_number: port,
                protocol: request.protocol,
                is_auto_allocated,
                allocated_by: allocated_by.to_string(),
            });
        }

        Ok(claims)
    }
}
