use crate::domain::model::{AllocationScope, DependencyType, ServiceId};
use thiserror::Error;

/// 儲存層回報的錯誤
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: Constraint },

    #[error("Referenced record does not exist: {0}")]
    MissingReference(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 儲存層的唯一性約束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// (team, slug) 於服務表唯一
    ServiceSlug,
    /// (team, slug) 於解決方案表唯一
    SolutionSlug,
    /// (service, environment, port) 唯一
    ServicePort,
    /// (team, environment, port_type, port) 唯一，僅在排他模式下檢查
    ScopePort,
    /// (source, target, dependency_type) 唯一
    DependencyEdge,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Constraint::ServiceSlug => "service_slug",
            Constraint::SolutionSlug => "solution_slug",
            Constraint::ServicePort => "service_port",
            Constraint::ScopePort => "scope_port",
            Constraint::DependencyEdge => "dependency_edge",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid port range for {context}: start {start} > end {end}")]
    InvalidRange { context: String, start: u16, end: u16 },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Port {port} is outside {scope} range [{lower}, {upper}]")]
    OutOfRange {
        scope: AllocationScope,
        port: u16,
        lower: u16,
        upper: u16,
    },

    #[error("Port {port} is already allocated in {scope} to service {holder}")]
    PortConflict {
        scope: AllocationScope,
        port: u16,
        holder: ServiceId,
    },

    #[error("No free port left in {scope} range [{lower}, {upper}]")]
    RangeExhausted {
        scope: AllocationScope,
        lower: u16,
        upper: u16,
    },

    #[error("Gave up on {resource} after {attempts} conflicting attempts")]
    AllocationContention { resource: String, attempts: u32 },

    #[error("Service {0} cannot depend on itself")]
    SelfDependency(ServiceId),

    #[error("Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ServiceId> },

    #[error("Timed out after {timeout_ms}ms waiting for lock on {resource}")]
    LockTimeout { resource: String, timeout_ms: u64 },

    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("Dependency {source_id} -> {target_id} ({dependency_type}) already exists")]
    DuplicateDependency {
        source_id: ServiceId,
        target_id: ServiceId,
        dependency_type: DependencyType,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error in {field}: {message}")]
    ConfigError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// 錯誤分類，供 API 層決定回應
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Client,
    Conflict,
    Contention,
    Configuration,
    Infrastructure,
}

impl RegistryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RegistryError::InvalidName { .. }
            | RegistryError::OutOfRange { .. }
            | RegistryError::SelfDependency(_)
            | RegistryError::ServiceNotFound(_) => ErrorCategory::Client,
            RegistryError::PortConflict { .. }
            | RegistryError::RangeExhausted { .. }
            | RegistryError::CyclicDependency { .. }
            | RegistryError::DuplicateDependency { .. } => ErrorCategory::Conflict,
            RegistryError::AllocationContention { .. } | RegistryError::LockTimeout { .. } => {
                ErrorCategory::Contention
            }
            RegistryError::InvalidRange { .. }
            | RegistryError::ConfigError { .. }
            | RegistryError::InvalidConfigValueError { .. }
            | RegistryError::TomlError(_)
            | RegistryError::TomlSerializeError(_) => ErrorCategory::Configuration,
            RegistryError::Store(_) | RegistryError::IoError(_) | RegistryError::SerializationError(_) => {
                ErrorCategory::Infrastructure
            }
        }
    }

    /// 對應 HTTP 狀態碼的建議值
    pub fn status_hint(&self) -> u16 {
        match self {
            RegistryError::ServiceNotFound(_) => 404,
            RegistryError::InvalidName { .. }
            | RegistryError::OutOfRange { .. }
            | RegistryError::SelfDependency(_) => 400,
            RegistryError::PortConflict { .. }
            | RegistryError::RangeExhausted { .. }
            | RegistryError::CyclicDependency { .. }
            | RegistryError::DuplicateDependency { .. }
            | RegistryError::AllocationContention { .. } => 409,
            RegistryError::LockTimeout { .. } => 423,
            RegistryError::InvalidRange { .. }
            | RegistryError::ConfigError { .. }
            | RegistryError::InvalidConfigValueError { .. }
            | RegistryError::TomlError(_)
            | RegistryError::TomlSerializeError(_)
            | RegistryError::IoError(_)
            | RegistryError::SerializationError(_) => 500,
            RegistryError::Store(_) => 503,
        }
    }

    /// 呼叫者稍後重試是否可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::AllocationContention { .. }
                | RegistryError::LockTimeout { .. }
                | RegistryError::Store(StoreError::Unavailable(_))
        )
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            RegistryError::OutOfRange { port, lower, upper, .. } => {
                format!("Port {} is not allowed here; pick one between {} and {}", port, lower, upper)
            }
            RegistryError::PortConflict { port, holder, .. } => {
                format!("Port {} is already taken by service {}", port, holder)
            }
            RegistryError::RangeExhausted { scope, .. } => {
                format!("Every port available for {} is in use; ask a team admin to widen the range", scope)
            }
            RegistryError::CyclicDependency { cycle } => {
                format!("That dependency would create a cycle: {}", format_cycle(cycle))
            }
            RegistryError::AllocationContention { .. } | RegistryError::LockTimeout { .. } => {
                "The registry is busy with concurrent changes; try again shortly".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn format_cycle(cycle: &[ServiceId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
