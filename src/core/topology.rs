use crate::core::graph::DependencyGraph;
use crate::core::locks::KeyedLocks;
use crate::domain::model::{DependencyEdge, DependencyType, NewDependency, ServiceId, TeamId};
use crate::domain::ports::RegistryStore;
use crate::utils::error::{Constraint, RegistryError, Result, StoreError};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// 依賴邊的寫入者共用同一把鎖；環可能跨團隊，無法再細分
const GRAPH_LOCK: &str = "dependency-graph";

pub struct DependencyTopology<S: RegistryStore> {
    store: Arc<S>,
    locks: KeyedLocks<&'static str>,
}

impl<S: RegistryStore> DependencyTopology<S> {
    pub fn new(store: Arc<S>, locks: KeyedLocks<&'static str>) -> Self {
        Self { store, locks }
    }

    async fn ensure_service(&self, id: &ServiceId) -> Result<()> {
        match self.store.service(id).await? {
            Some(_) => Ok(()),
            None => Err(RegistryError::ServiceNotFound(id.clone())),
        }
    }

    /// 從 start 沿必要邊向外展開，只載入可達的部分
    async fn required_reachable(&self, start: &ServiceId) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        let mut seen: HashSet<ServiceId> = HashSet::from([start.clone()]);
        let mut frontier = vec![start.clone()];
        graph.add_vertex(start.clone());

        while !frontier.is_empty() {
            let edges = self.store.edges_from(&frontier).await?;
            frontier = Vec::new();
            for edge in edges.iter().filter(|edge| edge.is_required) {
                graph.add_edge(
                    edge.source_service_id.clone(),
                    edge.target_service_id.clone(),
                    edge.dependency_type,
                    true,
                );
                if seen.insert(edge.target_service_id.clone()) {
                    frontier.push(edge.target_service_id.clone());
                }
            }
        }
        Ok(graph)
    }

    /// 新增依賴邊；必要邊若會形成環則拒絕且不寫入
    pub async fn add_edge(
        &self,
        source: &ServiceId,
        target: &ServiceId,
        dependency_type: DependencyType,
        required: bool,
    ) -> Result<DependencyEdge> {
        if source == target {
            return Err(RegistryError::SelfDependency(source.clone()));
        }

        let _guard = self.locks.acquire(&GRAPH_LOCK).await?;
        self.ensure_service(source).await?;
        self.ensure_service(target).await?;

        if required {
            let graph = self.required_reachable(target).await?;
            if let Some(cycle) = graph.cycle_if_added(source, target) {
                tracing::warn!("Rejected {} -> {} ({}): would close a cycle", source, target, dependency_type);
                return Err(RegistryError::CyclicDependency { cycle });
            }
        }

        let new_edge = NewDependency {
            source_service_id: source.clone(),
            target_service_id: target.clone(),
            dependency_type,
            is_required: required,
        };
        match self.store.insert_edge(new_edge).await {
            Ok(edge) => {
                tracing::info!(
                    "Added dependency {} -> {} ({}, required={})",
                    source,
                    target,
                    dependency_type,
                    required
                );
                Ok(edge)
            }
            Err(StoreError::UniqueViolation {
                constraint: Constraint::DependencyEdge,
            }) => Err(RegistryError::DuplicateDependency {
                source_id: source.clone(),
                target_id: target.clone(),
                dependency_type,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// 刪除依賴邊；不存在時回傳 false
    pub async fn remove_edge(
        &self,
        source: &ServiceId,
        target: &ServiceId,
        dependency_type: DependencyType,
    ) -> Result<bool> {
        let _guard = self.locks.acquire(&GRAPH_LOCK).await?;
        let removed = self.store.delete_edge(source, target, dependency_type).await?;
        if removed {
            tracing::info!("Removed dependency {} -> {} ({})", source, target, dependency_type);
        }
        Ok(removed)
    }

    /// 依實際選取的服務重新計算順序，不依賴寫入時的環檢查
    pub async fn topological_order(&self, selection: &[ServiceId]) -> Result<Vec<ServiceId>> {
        let edges = self.store.edges_among(selection).await?;
        let mut graph = DependencyGraph::from_edges(&edges);
        for id in selection {
            graph.add_vertex(id.clone());
        }
        let order = graph.topological_order(selection)?;
        tracing::debug!("Startup order for {} services: {:?}", order.len(), order);
        Ok(order)
    }

    /// 遞移依賴此服務的所有服務 (含選用依賴)
    pub async fn impact_of(&self, id: &ServiceId) -> Result<BTreeSet<ServiceId>> {
        let mut graph = DependencyGraph::new();
        let mut seen: HashSet<ServiceId> = HashSet::from([id.clone()]);
        let mut frontier = vec![id.clone()];

        while !frontier.is_empty() {
            let edges = self.store.edges_to(&frontier).await?;
            frontier = Vec::new();
            for edge in &edges {
                graph.add_edge(
                    edge.source_service_id.clone(),
                    edge.target_service_id.clone(),
                    edge.dependency_type,
                    edge.is_required,
                );
                if seen.insert(edge.source_service_id.clone()) {
                    frontier.push(edge.source_service_id.clone());
                }
            }
        }
        Ok(graph.impact_of(id))
    }

    pub async fn graph_for_team(&self, team_id: &TeamId) -> Result<DependencyGraph> {
        let edges = self.store.edges_for_team(team_id).await?;
        Ok(DependencyGraph::from_edges(&edges))
    }

    /// 稽核團隊的完整必要依賴圖，回傳找到的第一個環
    pub async fn find_cycle(&self, team_id: &TeamId) -> Result<Option<Vec<ServiceId>>> {
        let graph = self.graph_for_team(team_id).await?;
        let cycle = graph.find_cycle();
        if let Some(cycle) = &cycle {
            tracing::warn!("Team {} has a required dependency cycle: {:?}", team_id, cycle);
        }
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::model::NewService;
    use std::time::Duration;

    async fn setup(names: &[&str]) -> (Arc<InMemoryStore>, DependencyTopology<InMemoryStore>, Vec<ServiceId>) {
        let store = Arc::new(InMemoryStore::new());
        let mut ids = Vec::new();
        for name in names {
            let (service, _) = store
                .insert_service(
                    NewService {
                        team_id: TeamId::from("core"),
                        name: name.to_string(),
                        slug: name.to_string(),
                    },
                    vec![],
                )
                .await
                .unwrap();
            ids.push(service.id);
        }
        let topology = DependencyTopology::new(store.clone(), KeyedLocks::new(Duration::from_millis(200)));
        (store, topology, ids)
    }

    #[tokio::test]
    async fn test_reverse_required_edge_is_rejected() {
        let (store, topology, ids) = setup(&["a", "b"]).await;
        let (a, b) = (&ids[0], &ids[1]);

        topology.add_edge(a, b, DependencyType::HttpRest, true).await.unwrap();
        let err = topology.add_edge(b, a, DependencyType::Grpc, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::CyclicDependency { .. }));

        let edges = store.edges_for_team(&TeamId::from("core")).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0].source_service_id, a);
    }

    #[tokio::test]
    async fn test_optional_edges_never_rejected_for_cycles() {
        let (_, topology, ids) = setup(&["a", "b"]).await;
        topology.add_edge(&ids[0], &ids[1], DependencyType::HttpRest, true).await.unwrap();
        tokio_test::assert_ok!(topology.add_edge(&ids[1], &ids[0], DependencyType::KafkaTopic, false).await);
    }

    #[tokio::test]
    async fn test_self_and_duplicate_edges() {
        let (_, topology, ids) = setup(&["a", "b"]).await;
        let err = topology.add_edge(&ids[0], &ids[0], DependencyType::Library, false).await.unwrap_err();
        assert!(matches!(err, RegistryError::SelfDependency(_)));

        topology.add_edge(&ids[0], &ids[1], DependencyType::Library, false).await.unwrap();
        let err = topology.add_edge(&ids[0], &ids[1], DependencyType::Library, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDependency { .. }));

        // 不同類型視為平行邊
        tokio_test::assert_ok!(topology.add_edge(&ids[0], &ids[1], DependencyType::Grpc, true).await);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_rejected() {
        let (_, topology, ids) = setup(&["a"]).await;
        let err = topology
            .add_edge(&ids[0], &ServiceId::from("ghost"), DependencyType::HttpRest, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_transitive_cycle_detection() {
        let (_, topology, ids) = setup(&["a", "b", "c"]).await;
        topology.add_edge(&ids[0], &ids[1], DependencyType::HttpRest, true).await.unwrap();
        topology.add_edge(&ids[1], &ids[2], DependencyType::HttpRest, true).await.unwrap();

        match topology.add_edge(&ids[2], &ids[0], DependencyType::HttpRest, true).await {
            Err(RegistryError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec![ids[2].clone(), ids[0].clone(), ids[1].clone(), ids[2].clone()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_edge_is_idempotent() {
        let (_, topology, ids) = setup(&["a", "b"]).await;
        topology.add_edge(&ids[0], &ids[1], DependencyType::HttpRest, true).await.unwrap();
        assert!(topology.remove_edge(&ids[0], &ids[1], DependencyType::HttpRest).await.unwrap());
        assert!(!topology.remove_edge(&ids[0], &ids[1], DependencyType::HttpRest).await.unwrap());

        // 移除後反向邊可以加入
        tokio_test::assert_ok!(topology.add_edge(&ids[1], &ids[0], DependencyType::HttpRest, true).await);
    }

    #[tokio::test]
    async fn test_order_impact_and_audit() {
        let (_, topology, ids) = setup(&["a", "b", "c"]).await;
        topology.add_edge(&ids[0], &ids[1], DependencyType::HttpRest, true).await.unwrap();
        topology.add_edge(&ids[1], &ids[2], DependencyType::Grpc, true).await.unwrap();
        topology.add_edge(&ids[2], &ids[0], DependencyType::Other, false).await.unwrap();

        let order = topology.topological_order(&[ids[2].clone(), ids[1].clone(), ids[0].clone()]).await.unwrap();
        assert_eq!(order, ids);

        let impact = topology.impact_of(&ids[2]).await.unwrap();
        assert_eq!(impact, [ids[0].clone(), ids[1].clone()].into_iter().collect());

        assert!(topology.find_cycle(&TeamId::from("core")).await.unwrap().is_none());
        assert_eq!(topology.graph_for_team(&TeamId::from("core")).await.unwrap().edge_count(), 3);
    }
}
