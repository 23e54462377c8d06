use crate::utils::error::{RegistryError, Result};
use crate::utils::validation::{validate_positive_number, validate_range, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub allocation: AllocationConfig,
    pub slug: SlugConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// 儲存層回報衝突時，整個分配流程最多重跑幾次
    pub max_attempts: u32,
    pub lock_timeout_ms: u64,
    /// 允許手動分配與同範圍其他服務共用連接埠
    pub allow_shared_manual_ports: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lock_timeout_ms: 5_000,
            allow_shared_manual_ports: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlugConfig {
    pub min_length: usize,
    pub max_length: usize,
    /// 消歧義時最多嘗試的後綴數量
    pub max_probes: u32,
}

impl Default for SlugConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 63,
            max_probes: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: bool,
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RegistryError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| RegistryError::ConfigError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${LOCK_TIMEOUT_MS})，未定義的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid");

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation.lock_timeout_ms)
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number(
            "allocation.max_attempts",
            self.allocation.max_attempts as usize,
            1,
        )?;
        validate_range("allocation.lock_timeout_ms", self.allocation.lock_timeout_ms, 1, 600_000)?;
        validate_range("slug.min_length", self.slug.min_length, 1, 255)?;
        validate_range("slug.max_length", self.slug.max_length, self.slug.min_length, 255)?;
        validate_positive_number("slug.max_probes", self.slug.max_probes as usize, 1)?;

        // 最長的後綴接在最短的 slug 後面仍需放得下
        let widest_suffix = format!("-{}", u64::from(self.slug.max_probes) + 1);
        if self.slug.max_length < self.slug.min_length + widest_suffix.len() {
            return Err(RegistryError::InvalidConfigValueError {
                field: "slug.max_length".to_string(),
                value: self.slug.max_length.to_string(),
                reason: format!(
                    "Must fit {} characters plus suffix '{}'",
                    self.slug.min_length, widest_suffix
                ),
            });
        }

        if let Some(level) = &self.logging.level {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&level.to_ascii_lowercase().as_str()) {
                return Err(RegistryError::InvalidConfigValueError {
                    field: "logging.level".to_string(),
                    value: level.clone(),
                    reason: format!("Unsupported level. Valid levels: {}", valid_levels.join(", ")),
                });
            }
        }

        Ok(())
    }
}
