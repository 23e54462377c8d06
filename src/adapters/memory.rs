use crate::adapters::snapshot::RegistrySnapshot;
use crate::domain::model::{
    AllocationScope, DependencyEdge, DependencyType, EdgeKey, Environment, NewDependency,
    NewService, NewSolution, PortAllocation, PortClaim, PortRange, PortType, ServiceId,
    ServiceRecord, SlugKind, SolutionId, SolutionRecord, TeamId,
};
use crate::domain::ports::{PortExclusivity, RegistryStore, StoreResult};
use crate::utils::error::{Constraint, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    ranges: HashMap<(TeamId, PortType, Environment), PortRange>,
    services: BTreeMap<ServiceId, ServiceRecord>,
    solutions: BTreeMap<SolutionId, SolutionRecord>,
    allocations: BTreeMap<u64, PortAllocation>,
    edges: BTreeMap<EdgeKey, DependencyEdge>,
    next_service: u64,
    next_solution: u64,
    next_allocation: u64,
}

impl StoreState {
    fn team_of(&self, id: &ServiceId) -> Option<&TeamId> {
        self.services.get(id).map(|service| &service.team_id)
    }

    fn in_scope(&self, allocation: &PortAllocation, scope: &AllocationScope) -> bool {
        allocation.environment == scope.environment
            && allocation.port_type == scope.port_type
            && self.team_of(&allocation.service_id) == Some(&scope.team_id)
    }

    fn fresh_service_id(&mut self) -> ServiceId {
        loop {
            self.next_service += 1;
            let id = ServiceId::new(format!("svc-{:06}", self.next_service));
            if !self.services.contains_key(&id) {
                return id;
            }
        }
    }

    fn fresh_solution_id(&mut self) -> SolutionId {
        loop {
            self.next_solution += 1;
            let id = SolutionId::new(format!("sol-{:06}", self.next_solution));
            if !self.solutions.contains_key(&id) {
                return id;
            }
        }
    }

    /// 檢查整批分配是否違反約束；只讀取，不修改狀態
    fn check_claims(
        &self,
        team_id: &TeamId,
        service_id: &ServiceId,
        claims: &[PortClaim],
        exclusivity: PortExclusivity,
    ) -> StoreResult<()> {
        let mut batch_service: HashSet<(&Environment, u16)> = HashSet::new();
        let mut batch_scope: HashSet<(&Environment, PortType, u16)> = HashSet::new();

        for claim in claims {
            let service_clash = !batch_service.insert((&claim.environment, claim.port_number))
                || self.allocations.values().any(|existing| {
                    &existing.service_id == service_id
                        && existing.environment == claim.environment
                        && existing.port_number == claim.port_number
                });
            if service_clash {
                return Err(StoreError::UniqueViolation {
                    constraint: Constraint::ServicePort,
                });
            }

            if exclusivity == PortExclusivity::Scope {
                let scope = claim.scope(team_id);
                let scope_clash = !batch_scope.insert((&claim.environment, claim.port_type, claim.port_number))
                    || self
                        .allocations
                        .values()
                        .any(|existing| existing.port_number == claim.port_number && self.in_scope(existing, &scope));
                if scope_clash {
                    return Err(StoreError::UniqueViolation {
                        constraint: Constraint::ScopePort,
                    });
                }
            }
        }
        Ok(())
    }

    fn commit_claims(&mut self, service_id: &ServiceId, claims: Vec<PortClaim>) -> Vec<PortAllocation> {
        let now = Utc::now();
        claims
            .into_iter()
            .map(|claim| {
                self.next_allocation += 1;
                let allocation = PortAllocation {
                    id: self.next_allocation,
                    service_id: service_id.clone(),
                    environment: claim.environment,
                    port_type: claim.port_type,
                    port_number: claim.port_number,
                    protocol: claim.protocol,
                    is_auto_allocated: claim.is_auto_allocated,
                    allocated_by: claim.allocated_by,
                    allocated_at: now,
                };
                self.allocations.insert(allocation.id, allocation.clone());
                allocation
            })
            .collect()
    }
}

/// 以記憶體實作的儲存層；所有寫入在同一把寫鎖內完成，讀取者不會看到寫一半的狀態
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增或覆寫團隊的連接埠範圍
    pub async fn put_port_range(&self, range: PortRange) {
        let mut state = self.state.write().await;
        let key = (range.team_id.clone(), range.port_type, range.environment.clone());
        state.ranges.insert(key, range);
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut state = StoreState::default();

        for range in snapshot.ranges {
            let key = (range.team_id.clone(), range.port_type, range.environment.clone());
            state.ranges.insert(key, range);
        }
        for service in snapshot.services {
            state.services.insert(service.id.clone(), service);
        }
        for solution in snapshot.solutions {
            state.solutions.insert(solution.id.clone(), solution);
        }
        for allocation in snapshot.allocations {
            state.next_allocation = state.next_allocation.max(allocation.id);
            state.allocations.insert(allocation.id, allocation);
        }
        for edge in snapshot.dependencies {
            state.edges.insert(edge.key(), edge);
        }
        state.next_service = state.services.len() as u64;
        state.next_solution = state.solutions.len() as u64;

        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        let mut ranges: Vec<PortRange> = state.ranges.values().cloned().collect();
        ranges.sort_by(|a, b| {
            (&a.team_id, &a.environment, a.port_type).cmp(&(&b.team_id, &b.environment, b.port_type))
        });

        RegistrySnapshot {
            ranges,
            services: state.services.values().cloned().collect(),
            solutions: state.solutions.values().cloned().collect(),
            allocations: state.allocations.values().cloned().collect(),
            dependencies: state.edges.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn port_range(
        &self,
        team_id: &TeamId,
        port_type: PortType,
        environment: &Environment,
    ) -> StoreResult<Option<PortRange>> {
        let state = self.state.read().await;
        Ok(state
            .ranges
            .get(&(team_id.clone(), port_type, environment.clone()))
            .cloned())
    }

    async fn service(&self, id: &ServiceId) -> StoreResult<Option<ServiceRecord>> {
        let state = self.state.read().await;
        Ok(state.services.get(id).cloned())
    }

    async fn allocations_in_scope(&self, scope: &AllocationScope) -> StoreResult<Vec<PortAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .allocations
            .values()
            .filter(|allocation| state.in_scope(allocation, scope))
            .cloned()
            .collect())
    }

    async fn allocations_for_service(&self, id: &ServiceId) -> StoreResult<Vec<PortAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .allocations
            .values()
            .filter(|allocation| &allocation.service_id == id)
            .cloned()
            .collect())
    }

    async fn insert_allocations(
        &self,
        service_id: &ServiceId,
        claims: Vec<PortClaim>,
        exclusivity: PortExclusivity,
    ) -> StoreResult<Vec<PortAllocation>> {
        let mut state = self.state.write().await;
        let team_id = state
            .team_of(service_id)
            .cloned()
            .ok_or_else(|| StoreError::MissingReference(format!("service {}", service_id)))?;

        state.check_claims(&team_id, service_id, &claims, exclusivity)?;
        Ok(state.commit_claims(service_id, claims))
    }

    async fn delete_allocation(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_number: u16,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.allocations.len();
        state.allocations.retain(|_, allocation| {
            !(&allocation.service_id == service_id
                && &allocation.environment == environment
                && allocation.port_number == port_number)
        });
        Ok(state.allocations.len() != before)
    }

    async fn slug_exists(&self, kind: SlugKind, team_id: &TeamId, slug: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        let exists = match kind {
            SlugKind::Service => state
                .services
                .values()
                .any(|service| &service.team_id == team_id && service.slug == slug),
            SlugKind::Solution => state
                .solutions
                .values()
                .any(|solution| &solution.team_id == team_id && solution.slug == slug),
        };
        Ok(exists)
    }

    async fn insert_service(
        &self,
        service: NewService,
        claims: Vec<PortClaim>,
    ) -> StoreResult<(ServiceRecord, Vec<PortAllocation>)> {
        let mut state = self.state.write().await;

        let slug_taken = state
            .services
            .values()
            .any(|existing| existing.team_id == service.team_id && existing.slug == service.slug);
        if slug_taken {
            return Err(StoreError::UniqueViolation {
                constraint: Constraint::ServiceSlug,
            });
        }

        let id = state.fresh_service_id();
        if let Err(e) = state.check_claims(&service.team_id, &id, &claims, PortExclusivity::Scope) {
            // 還沒寫入任何東西，只需退回序號
            state.next_service -= 1;
            return Err(e);
        }

        let record = ServiceRecord {
            id: id.clone(),
            team_id: service.team_id,
            name: service.name,
            slug: service.slug,
        };
        state.services.insert(id.clone(), record.clone());
        let allocations = state.commit_claims(&id, claims);
        Ok((record, allocations))
    }

    async fn delete_service(&self, id: &ServiceId) -> StoreResult<Option<usize>> {
        let mut state = self.state.write().await;
        if state.services.remove(id).is_none() {
            return Ok(None);
        }
        let before = state.allocations.len();
        state.allocations.retain(|_, allocation| &allocation.service_id != id);
        let released = before - state.allocations.len();
        state
            .edges
            .retain(|key, _| &key.source != id && &key.target != id);
        Ok(Some(released))
    }

    async fn insert_solution(&self, solution: NewSolution) -> StoreResult<SolutionRecord> {
        let mut state = self.state.write().await;

        let slug_taken = state
            .solutions
            .values()
            .any(|existing| existing.team_id == solution.team_id && existing.slug == solution.slug);
        if slug_taken {
            return Err(StoreError::UniqueViolation {
                constraint: Constraint::SolutionSlug,
            });
        }

        let record = SolutionRecord {
            id: state.fresh_solution_id(),
            team_id: solution.team_id,
            name: solution.name,
            slug: solution.slug,
        };
        state.solutions.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn edges_from(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>> {
        let state = self.state.read().await;
        let wanted: HashSet<&ServiceId> = ids.iter().collect();
        Ok(state
            .edges
            .values()
            .filter(|edge| wanted.contains(&edge.source_service_id))
            .cloned()
            .collect())
    }

    async fn edges_to(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>> {
        let state = self.state.read().await;
        let wanted: HashSet<&ServiceId> = ids.iter().collect();
        Ok(state
            .edges
            .values()
            .filter(|edge| wanted.contains(&edge.target_service_id))
            .cloned()
            .collect())
    }

    async fn edges_among(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>> {
        let state = self.state.read().await;
        let wanted: HashSet<&ServiceId> = ids.iter().collect();
        Ok(state
            .edges
            .values()
            .filter(|edge| wanted.contains(&edge.source_service_id) && wanted.contains(&edge.target_service_id))
            .cloned()
            .collect())
    }

    async fn edges_for_team(&self, team_id: &TeamId) -> StoreResult<Vec<DependencyEdge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .values()
            .filter(|edge| {
                state.team_of(&edge.source_service_id) == Some(team_id)
                    || state.team_of(&edge.target_service_id) == Some(team_id)
            })
            .cloned()
            .collect())
    }

    async fn insert_edge(&self, edge: NewDependency) -> StoreResult<DependencyEdge> {
        let mut state = self.state.write().await;
        for id in [&edge.source_service_id, &edge.target_service_id] {
            if !state.services.contains_key(id) {
                return Err(StoreError::MissingReference(format!("service {}", id)));
            }
        }

        let record = DependencyEdge {
            source_service_id: edge.source_service_id,
            target_service_id: edge.target_service_id,
            dependency_type: edge.dependency_type,
            is_required: edge.is_required,
            created_at: Utc::now(),
        };
        let key = record.key();
        if state.edges.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: Constraint::DependencyEdge,
            });
        }
        state.edges.insert(key, record.clone());
        Ok(record)
    }

    async fn delete_edge(
        &self,
        source: &ServiceId,
        target: &ServiceId,
        dependency_type: DependencyType,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let key = EdgeKey {
            source: source.clone(),
            target: target.clone(),
            dependency_type,
        };
        Ok(state.edges.remove(&key).is_some())
    }
}
