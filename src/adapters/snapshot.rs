use crate::domain::model::{DependencyEdge, PortAllocation, PortRange, ServiceId, ServiceRecord, SolutionRecord};
use crate::utils::error::{RegistryError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 以 TOML 保存的登錄狀態，用來預載或匯出記憶體儲存層
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub ranges: Vec<PortRange>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub solutions: Vec<SolutionRecord>,
    #[serde(default)]
    pub allocations: Vec<PortAllocation>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
}

impl RegistrySnapshot {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let snapshot: RegistrySnapshot = toml::from_str(content)?;
        Ok(snapshot)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

impl Validate for RegistrySnapshot {
    fn validate(&self) -> Result<()> {
        for range in &self.ranges {
            if range.range_start > range.range_end {
                return Err(RegistryError::InvalidRange {
                    context: format!("{}/{}/{}", range.team_id, range.environment, range.port_type),
                    start: range.range_start,
                    end: range.range_end,
                });
            }
        }

        let mut known: HashSet<&ServiceId> = HashSet::new();
        let mut slugs = HashSet::new();
        for service in &self.services {
            validate_non_empty_string("services.id", service.id.as_str())?;
            validate_non_empty_string("services.team_id", service.team_id.as_str())?;
            validate_non_empty_string("services.slug", &service.slug)?;
            if !known.insert(&service.id) {
                return Err(RegistryError::ConfigError {
                    field: "services.id".to_string(),
                    message: format!("Duplicate service id '{}'", service.id),
                });
            }
            if !slugs.insert((&service.team_id, &service.slug)) {
                return Err(RegistryError::ConfigError {
                    field: "services.slug".to_string(),
                    message: format!("Slug '{}' is used twice in team {}", service.slug, service.team_id),
                });
            }
        }

        let unknown = |field: &str, id: &ServiceId| RegistryError::ConfigError {
            field: field.to_string(),
            message: format!("Unknown service '{}'", id),
        };
        let mut allocation_ids = HashSet::new();
        let mut held = HashSet::new();
        for allocation in &self.allocations {
            if !known.contains(&allocation.service_id) {
                return Err(unknown("allocations.service_id", &allocation.service_id));
            }
            if !allocation_ids.insert(allocation.id) {
                return Err(RegistryError::ConfigError {
                    field: "allocations.id".to_string(),
                    message: format!("Duplicate allocation id {}", allocation.id),
                });
            }
            if !held.insert((&allocation.service_id, &allocation.environment, allocation.port_number)) {
                return Err(RegistryError::ConfigError {
                    field: "allocations.port_number".to_string(),
                    message: format!(
                        "Service '{}' holds port {} twice in {}",
                        allocation.service_id, allocation.port_number, allocation.environment
                    ),
                });
            }
        }
        for edge in &self.dependencies {
            for id in [&edge.source_service_id, &edge.target_service_id] {
                if !known.contains(id) {
                    return Err(unknown("dependencies", id));
                }
            }
            if edge.source_service_id == edge.target_service_id {
                return Err(RegistryError::SelfDependency(edge.source_service_id.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{DependencyType, PortType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[[ranges]]
team_id = "core"
port_type = "HTTP_API"
environment = "dev"
range_start = 8000
range_end = 8010

[[services]]
id = "svc-000001"
team_id = "core"
name = "Payment API"
slug = "payment-api"

[[services]]
id = "svc-000002"
team_id = "core"
name = "Ledger"
slug = "ledger"

[[allocations]]
id = 1
service_id = "svc-000001"
environment = "dev"
port_type = "HTTP_API"
port_number = 8000

[[dependencies]]
source_service_id = "svc-000001"
target_service_id = "svc-000002"
dependency_type = "GRPC"
is_required = true
"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let snapshot = RegistrySnapshot::from_toml_str(SAMPLE).unwrap();
        snapshot.validate().unwrap();

        assert_eq!(snapshot.ranges[0].port_type, PortType::HttpApi);
        assert_eq!(snapshot.services.len(), 2);
        assert!(!snapshot.allocations[0].is_auto_allocated);
        assert_eq!(snapshot.dependencies[0].dependency_type, DependencyType::Grpc);
    }

    #[test]
    fn test_unknown_service_reference_is_rejected() {
        let broken = SAMPLE.replace("target_service_id = \"svc-000002\"", "target_service_id = \"svc-404\"");
        let snapshot = RegistrySnapshot::from_toml_str(&broken).unwrap();
        assert!(matches!(snapshot.validate(), Err(RegistryError::ConfigError { .. })));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let broken = SAMPLE.replace("range_end = 8010", "range_end = 7000");
        let snapshot = RegistrySnapshot::from_toml_str(&broken).unwrap();
        assert!(matches!(
            snapshot.validate(),
            Err(RegistryError::InvalidRange { start: 8000, end: 7000, .. })
        ));
    }

    #[test]
    fn test_duplicate_allocations_are_rejected() {
        let with_allocation = |extra: &str| {
            SAMPLE.replace("[[dependencies]]", &format!("[[allocations]]\n{}\n[[dependencies]]", extra))
        };

        let repeated_id = with_allocation(
            "id = 1\nservice_id = \"svc-000002\"\nenvironment = \"dev\"\nport_type = \"HTTP_API\"\nport_number = 8001\n",
        );
        let snapshot = RegistrySnapshot::from_toml_str(&repeated_id).unwrap();
        match snapshot.validate() {
            Err(RegistryError::ConfigError { field, .. }) => assert_eq!(field, "allocations.id"),
            other => panic!("expected duplicate id rejection, got {other:?}"),
        }

        let repeated_port = with_allocation(
            "id = 2\nservice_id = \"svc-000001\"\nenvironment = \"dev\"\nport_type = \"DEBUG\"\nport_number = 8000\n",
        );
        let snapshot = RegistrySnapshot::from_toml_str(&repeated_port).unwrap();
        match snapshot.validate() {
            Err(RegistryError::ConfigError { field, .. }) => assert_eq!(field, "allocations.port_number"),
            other => panic!("expected duplicate port rejection, got {other:?}"),
        }

        // 同一連接埠在不同環境不算重複
        let other_env = with_allocation(
            "id = 2\nservice_id = \"svc-000001\"\nenvironment = \"prod\"\nport_type = \"DEBUG\"\nport_number = 8000\n",
        );
        let snapshot = RegistrySnapshot::from_toml_str(&other_env).unwrap();
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let snapshot = RegistrySnapshot::from_toml_str(SAMPLE).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(snapshot.to_toml().unwrap().as_bytes()).unwrap();

        let reloaded = RegistrySnapshot::from_file(file.path()).unwrap();
        assert_eq!(reloaded, snapshot);
    }
}
