use crate::config::engine_config::EngineConfig;
use crate::core::allocator::{PortAllocator, PortRequest};
use crate::core::locks::KeyedLocks;
use crate::core::scope::DefaultRanges;
use crate::core::slug::SlugRules;
use crate::core::topology::DependencyTopology;
use crate::domain::model::{
    AllocationScope, NewService, NewSolution, PortAllocation, ServiceId, ServiceRecord, SlugKind,
    SolutionRecord, TeamId,
};
use crate::domain::ports::RegistryStore;
use crate::utils::error::{Constraint, RegistryError, Result, StoreError};
use crate::utils::validation::Validate;
use std::collections::BTreeSet;
use std::sync::Arc;

/// 註冊服務的請求
#[derive(Debug, Clone)]
pub struct RegisterService {
    pub team_id: TeamId,
    pub display_name: String,
    pub ports: Vec<PortRequest>,
    pub requested_by: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub service: ServiceRecord,
    pub allocations: Vec<PortAllocation>,
}

#[derive(Debug, Clone)]
pub struct DeregisterReport {
    pub service: ServiceRecord,
    /// 移除前遞移依賴此服務的服務
    pub impacted: BTreeSet<ServiceId>,
    pub released: usize,
}

/// 組合名稱、連接埠與依賴圖的入口
pub struct RegistryEngine<S: RegistryStore> {
    store: Arc<S>,
    scope_locks: Arc<KeyedLocks<AllocationScope>>,
    allocator: PortAllocator<S>,
    topology: DependencyTopology<S>,
    slug_rules: SlugRules,
    max_attempts: u32,
}

impl<S: RegistryStore> RegistryEngine<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        // 預設範圍設定錯誤屬於啟動期錯誤
        DefaultRanges.validate()?;

        let scope_locks = Arc::new(KeyedLocks::new(config.lock_timeout()));
        let allocator = PortAllocator::new(store.clone(), DefaultRanges, scope_locks.clone(), &config.allocation);
        let topology = DependencyTopology::new(store.clone(), KeyedLocks::new(config.lock_timeout()));

        tracing::debug!(
            "Registry engine ready (max_attempts={}, lock_timeout={:?})",
            config.allocation.max_attempts,
            config.lock_timeout()
        );

        Ok(Self {
            store,
            scope_locks,
            allocator,
            topology,
            slug_rules: SlugRules::from_config(&config.slug),
            max_attempts: config.allocation.max_attempts,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn allocator(&self) -> &PortAllocator<S> {
        &self.allocator
    }

    pub fn topology(&self) -> &DependencyTopology<S> {
        &self.topology
    }

    pub fn slug_rules(&self) -> &SlugRules {
        &self.slug_rules
    }

    async fn free_slug(&self, kind: SlugKind, team_id: &TeamId, base: &str) -> Result<String> {
        self.slug_rules
            .disambiguate(base, |candidate| {
                let store = self.store.clone();
                let team_id = team_id.clone();
                async move {
                    store
                        .slug_exists(kind, &team_id, &candidate)
                        .await
                        .map_err(RegistryError::from)
                }
            })
            .await
    }

    /// 建立服務並一次分配所有連接埠；任何一步失敗都不留下紀錄
    pub async fn register_service(&self, request: RegisterService) -> Result<Registration> {
        let base = self.slug_rules.canonicalize(&request.display_name)?;

        let scopes: Vec<AllocationScope> = request
            .ports
            .iter()
            .map(|port| AllocationScope::new(request.team_id.clone(), port.environment.clone(), port.port_type))
            .collect();
        let _guards = self.scope_locks.acquire_all(&scopes).await?;

        let claimant = ServiceId::new(format!("{}/{}", request.team_id, base));
        for attempt in 1..=self.max_attempts {
            let slug = self.free_slug(SlugKind::Service, &request.team_id, &base).await?;
            let claims = self
                .allocator
                .plan_claims(&request.team_id, &claimant, &request.ports, &request.requested_by)
                .await?;

            let new_service = NewService {
                team_id: request.team_id.clone(),
                name: request.display_name.clone(),
                slug: slug.clone(),
            };
            match self.store.insert_service(new_service, claims).await {
                Ok((service, allocations)) => {
                    tracing::info!(
                        "Registered service {} ({}) with {} port(s)",
                        service.slug,
                        service.id,
                        allocations.len()
                    );
                    return Ok(Registration { service, allocations });
                }
                Err(StoreError::UniqueViolation {
                    constraint: constraint @ (Constraint::ServiceSlug | Constraint::ScopePort | Constraint::ServicePort),
                }) => {
                    tracing::warn!(
                        "Registration of '{}' hit {} on attempt {}/{}, retrying",
                        slug,
                        constraint,
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::AllocationContention {
            resource: claimant.to_string(),
            attempts: self.max_attempts,
        })
    }

    pub async fn create_solution(&self, team_id: &TeamId, display_name: &str) -> Result<SolutionRecord> {
        let base = self.slug_rules.canonicalize(display_name)?;

        for attempt in 1..=self.max_attempts {
            let slug = self.free_slug(SlugKind::Solution, team_id, &base).await?;
            let new_solution = NewSolution {
                team_id: team_id.clone(),
                name: display_name.to_string(),
                slug: slug.clone(),
            };
            match self.store.insert_solution(new_solution).await {
                Ok(solution) => {
                    tracing::info!("Created solution {} ({})", solution.slug, solution.id);
                    return Ok(solution);
                }
                Err(StoreError::UniqueViolation {
                    constraint: Constraint::SolutionSlug,
                }) => {
                    tracing::warn!(
                        "Solution slug '{}' was taken concurrently, attempt {}/{}",
                        slug,
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::AllocationContention {
            resource: format!("{}/{}", team_id, base),
            attempts: self.max_attempts,
        })
    }

    /// 移除服務，連帶釋放連接埠與依賴邊
    pub async fn deregister_service(&self, id: &ServiceId) -> Result<DeregisterReport> {
        let service = self
            .store
            .service(id)
            .await?
            .ok_or_else(|| RegistryError::ServiceNotFound(id.clone()))?;

        let allocations = self.store.allocations_for_service(id).await?;
        let scopes: Vec<AllocationScope> = allocations
            .iter()
            .map(|allocation| {
                AllocationScope::new(service.team_id.clone(), allocation.environment.clone(), allocation.port_type)
            })
            .collect();
        let _guards = self.scope_locks.acquire_all(&scopes).await?;

        let impacted = self.topology.impact_of(id).await?;
        if !impacted.is_empty() {
            tracing::warn!("Removing {} affects {} dependent service(s)", id, impacted.len());
        }

        // 以實際刪除的筆數為準
        let released = self
            .store
            .delete_service(id)
            .await?
            .ok_or_else(|| RegistryError::ServiceNotFound(id.clone()))?;
        tracing::info!("Deregistered {} and released {} port(s)", id, released);

        Ok(DeregisterReport {
            service,
            impacted,
            released,
        })
    }
}
