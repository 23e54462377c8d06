use chrono::Utc;
use registry_engine::domain::model::{DependencyEdge, DependencyType, ServiceId, ServiceRecord, TeamId};
use registry_engine::domain::ports::RegistryStore;
use registry_engine::{EngineConfig, InMemoryStore, RegisterService, RegistryEngine, RegistryError, RegistrySnapshot};
use std::collections::BTreeSet;
use std::sync::Arc;

async fn engine_with(names: &[&str]) -> (RegistryEngine<InMemoryStore>, Vec<ServiceId>) {
    let engine = RegistryEngine::new(Arc::new(InMemoryStore::new()), &EngineConfig::default()).unwrap();
    let mut ids = Vec::new();
    for name in names {
        let registration = engine
            .register_service(RegisterService {
                team_id: TeamId::from("core"),
                display_name: name.to_string(),
                ports: vec![],
                requested_by: "integration".to_string(),
            })
            .await
            .unwrap();
        ids.push(registration.service.id);
    }
    (engine, ids)
}

fn service(id: &str) -> ServiceRecord {
    ServiceRecord {
        id: ServiceId::from(id),
        team_id: TeamId::from("legacy"),
        name: id.to_string(),
        slug: id.to_string(),
    }
}

fn edge(source: &str, target: &str, required: bool) -> DependencyEdge {
    DependencyEdge {
        source_service_id: ServiceId::from(source),
        target_service_id: ServiceId::from(target),
        dependency_type: DependencyType::HttpRest,
        is_required: required,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_reverse_required_edge_leaves_single_edge() {
    let (engine, ids) = engine_with(&["alpha", "beta"]).await;
    let (a, b) = (&ids[0], &ids[1]);

    engine.topology().add_edge(a, b, DependencyType::HttpRest, true).await.unwrap();
    let err = engine.topology().add_edge(b, a, DependencyType::Grpc, true).await.unwrap_err();
    assert!(matches!(err, RegistryError::CyclicDependency { .. }));
    assert_eq!(err.status_hint(), 409);

    let graph = engine.topology().graph_for_team(&TeamId::from("core")).await.unwrap();
    assert_eq!(graph.edge_count(), 1);
}

#[tokio::test]
async fn test_order_ignores_optional_back_edge() {
    let (engine, ids) = engine_with(&["alpha", "beta", "gamma"]).await;
    let topology = engine.topology();
    topology.add_edge(&ids[0], &ids[1], DependencyType::HttpRest, true).await.unwrap();
    topology.add_edge(&ids[1], &ids[2], DependencyType::HttpRest, true).await.unwrap();

    let before = topology.topological_order(&ids).await.unwrap();
    assert_eq!(before, ids);

    topology.add_edge(&ids[2], &ids[0], DependencyType::KafkaTopic, false).await.unwrap();
    let after = topology.topological_order(&ids).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_impact_follows_every_edge_kind() {
    let (engine, ids) = engine_with(&["alpha", "beta", "gamma"]).await;
    let topology = engine.topology();
    topology.add_edge(&ids[0], &ids[1], DependencyType::Library, false).await.unwrap();
    topology.add_edge(&ids[1], &ids[2], DependencyType::Grpc, true).await.unwrap();

    let impact = topology.impact_of(&ids[2]).await.unwrap();
    let expected: BTreeSet<ServiceId> = [ids[0].clone(), ids[1].clone()].into_iter().collect();
    assert_eq!(impact, expected);
    assert!(topology.impact_of(&ids[0]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_order_recomputed_on_legacy_cycles() {
    // 在環檢查存在之前寫入的資料
    let snapshot = RegistrySnapshot {
        services: vec![service("a"), service("b"), service("c"), service("d")],
        dependencies: vec![edge("a", "b", true), edge("b", "c", true), edge("c", "a", true), edge("d", "a", true)],
        ..RegistrySnapshot::default()
    };
    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let engine = RegistryEngine::new(store.clone(), &EngineConfig::default()).unwrap();
    let topology = engine.topology();

    let full: Vec<ServiceId> = ["a", "b", "c", "d"].into_iter().map(ServiceId::from).collect();
    let err = topology.topological_order(&full).await.unwrap_err();
    assert!(matches!(err, RegistryError::CyclicDependency { .. }));

    // 子集合的必要邊無環時可以排序
    let subset = vec![ServiceId::from("d"), ServiceId::from("a"), ServiceId::from("b")];
    let order = topology.topological_order(&subset).await.unwrap();
    assert_eq!(order, vec![ServiceId::from("d"), ServiceId::from("a"), ServiceId::from("b")]);

    let cycle = topology.find_cycle(&TeamId::from("legacy")).await.unwrap().unwrap();
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.len() >= 4);

    // 移除一條邊後整個選集可以排序
    assert!(topology.remove_edge(&ServiceId::from("c"), &ServiceId::from("a"), DependencyType::HttpRest).await.unwrap());
    assert!(topology.find_cycle(&TeamId::from("legacy")).await.unwrap().is_none());
    let order = topology.topological_order(&full).await.unwrap();
    assert_eq!(order.first(), Some(&ServiceId::from("d")));
    assert_eq!(order.last(), Some(&ServiceId::from("c")));
    assert_eq!(store.edges_for_team(&TeamId::from("legacy")).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_ties_break_by_ascending_id() {
    let (engine, ids) = engine_with(&["one", "two", "three", "four"]).await;
    let mut shuffled = ids.clone();
    shuffled.reverse();

    let order = engine.topology().topological_order(&shuffled).await.unwrap();
    assert_eq!(order, ids);
}
