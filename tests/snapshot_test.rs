use registry_engine::domain::model::{Environment, PortType, TeamId};
use registry_engine::utils::validation::Validate;
use registry_engine::{
    EngineConfig, InMemoryStore, PortRequest, RegisterService, RegistryEngine, RegistryError, RegistrySnapshot,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

const SEED: &str = r#"
[[ranges]]
team_id = "core"
port_type = "DATABASE"
environment = "dev"
range_start = 15432
range_end = 15433

[[services]]
id = "svc-000001"
team_id = "core"
name = "Orders DB"
slug = "orders-db"

[[allocations]]
id = 1
service_id = "svc-000001"
environment = "dev"
port_type = "DATABASE"
port_number = 15432
is_auto_allocated = true
allocated_by = "seed"
"#;

#[tokio::test]
async fn test_seeded_store_continues_allocation_and_saves() {
    let mut seed_file = NamedTempFile::new().unwrap();
    seed_file.write_all(SEED.as_bytes()).unwrap();

    let snapshot = RegistrySnapshot::from_file(seed_file.path()).unwrap();
    snapshot.validate().unwrap();

    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let engine = RegistryEngine::new(store.clone(), &EngineConfig::default()).unwrap();

    let registration = engine
        .register_service(RegisterService {
            team_id: TeamId::from("core"),
            display_name: "Orders DB".to_string(),
            ports: vec![PortRequest::auto("dev", PortType::Database)],
            requested_by: "integration".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(registration.service.slug, "orders-db-2");
    assert_eq!(registration.allocations[0].port_number, 15433);
    assert_eq!(registration.allocations[0].id, 2);

    // 範圍已滿
    let err = engine
        .allocator()
        .allocate_auto(&registration.service.id, &Environment::from("dev"), PortType::Database, "integration")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::RangeExhausted { .. }));

    let dir = TempDir::new().unwrap();
    let saved_path = dir.path().join("registry.toml");
    store.snapshot().await.save(&saved_path).unwrap();

    let reloaded = RegistrySnapshot::from_file(&saved_path).unwrap();
    assert_eq!(reloaded.services.len(), 2);
    assert_eq!(reloaded.allocations.len(), 2);
    assert_eq!(reloaded.ranges.len(), 1);
}

#[test]
fn test_engine_config_file_drives_engine() {
    let mut config_file = NamedTempFile::new().unwrap();
    config_file
        .write_all(b"[allocation]\nmax_attempts = 1\nlock_timeout_ms = 100\n\n[slug]\nmin_length = 4\n")
        .unwrap();

    let config = EngineConfig::from_file(config_file.path()).unwrap();
    let engine = RegistryEngine::new(Arc::new(InMemoryStore::new()), &config).unwrap();

    let err = engine.slug_rules().canonicalize("db").unwrap_err();
    assert!(matches!(err, RegistryError::InvalidName { .. }));
    assert_eq!(engine.slug_rules().canonicalize("Orders DB").unwrap(), "orders-db");
}

#[test]
fn test_missing_files_report_io_errors() {
    let err = RegistrySnapshot::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, RegistryError::IoError(_)));

    let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(!err.is_retryable());
}
