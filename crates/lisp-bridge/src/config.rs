//! Bridge configuration.
//!
//! Loaded from TOML. Every section is optional; missing keys fall back to the
//! defaults below.
//!
//! ```toml
//! [sweep]
//! interval_ms = 1000
//!
//! [marshal]
//! cache_numbers = true
//!
//! [privilege]
//! forbidden_operations = ["eval-js", "eval-js-file", "recursive-edit"]
//! allow_nested_literal_eval = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub sweep: SweepConfig,
    pub marshal: MarshalConfig,
    pub privilege: PrivilegeConfig,
}

/// Liveness sweeper policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Period of the background sweeper in milliseconds. `0` disables it and
    /// leaves sweeping to host-triggered reconciliation.
    pub interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

/// Marshaller options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalConfig {
    /// Pass numeric arguments as cached host references instead of JSON text.
    pub cache_numbers: bool,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            cache_numbers: true,
        }
    }
}

/// Which operations are reserved for trusted callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Host operations the script side may never invoke by name.
    pub forbidden_operations: Vec<String>,
    /// Allow `evaluate_literal` while script code is already on the stack.
    pub allow_nested_literal_eval: bool,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            forbidden_operations: vec![
                "eval-js".to_string(),
                "eval-js-file".to_string(),
                "recursive-edit".to_string(),
            ],
            allow_nested_literal_eval: false,
        }
    }
}

impl PrivilegeConfig {
    pub fn is_forbidden(&self, operation: &str) -> bool {
        self.forbidden_operations.iter().any(|op| op == operation)
    }
}

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Builder-style override of the sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_number_cache(mut self, enabled: bool) -> Self {
        self.marshal.cache_numbers = enabled;
        self
    }

    pub fn allow_nested_literal_eval(mut self, allow: bool) -> Self {
        self.privilege.allow_nested_literal_eval = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.sweep.interval(), Some(Duration::from_secs(1)));
        assert!(config.marshal.cache_numbers);
        assert!(config.privilege.is_forbidden("eval-js"));
        assert!(config.privilege.is_forbidden("recursive-edit"));
        assert!(!config.privilege.is_forbidden("car"));
        assert!(!config.privilege.allow_nested_literal_eval);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [sweep]
            interval_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.sweep.interval(), None);
        assert!(config.marshal.cache_numbers);
        assert_eq!(config.privilege.forbidden_operations.len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[privilege]\nforbidden_operations = [\"kill-emacs\"]\nallow_nested_literal_eval = true"
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert!(config.privilege.is_forbidden("kill-emacs"));
        assert!(!config.privilege.is_forbidden("eval-js"));
        assert!(config.privilege.allow_nested_literal_eval);
    }

    #[test]
    fn test_invalid_toml() {
        let err = BridgeConfig::from_toml_str("[sweep]\ninterval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_builders() {
        let config = BridgeConfig::default()
            .with_sweep_interval(Duration::from_millis(250))
            .with_number_cache(false)
            .allow_nested_literal_eval(true);

        assert_eq!(config.sweep.interval_ms, 250);
        assert!(!config.marshal.cache_numbers);
        assert!(config.privilege.allow_nested_literal_eval);
    }
}
