//! Engine configuration: TOML file plus `JOBGATE_*` environment overrides.
//!
//! ```toml
//! [executor]
//! max_concurrent_jobs = 8
//! default_timeout_ms = 10000
//!
//! [sandbox]
//! root = "/var/lib/jobgate"
//! isolation = "process"
//!
//! [sandbox.limits]
//! memory_mb = 256
//!
//! [policies]
//! builtin = true
//! files = ["policies/site.json"]
//!
//! [logging]
//! level = "debug"
//! json = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::executor::ExecutorConfig;
use crate::policy::{builtin, Policy, PolicyError};
use crate::sandbox::{IsolationType, SandboxError, SandboxProfile};
use crate::telemetry;

/// Configuration faults raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("policy file {path}: {source}")]
    PolicyFile {
        path: PathBuf,
        #[source]
        source: PolicyError,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Directory sandboxes are created under; `$TMPDIR/jobgate` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Default profile for submissions without an override.
    #[serde(flatten)]
    pub profile: SandboxProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Load the built-in baseline before `files`.
    pub builtin: bool,
    /// JSON files, each holding one policy or an array of policies.
    pub files: Vec<PathBuf>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            builtin: true,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingSection {
    pub fn level(&self) -> Level {
        telemetry::parse_level(&self.level).unwrap_or(Level::INFO)
    }
}

/// Everything needed to stand up an executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub sandbox: SandboxSection,
    pub policies: PolicySection,
    pub logging: LoggingSection,
}

impl EngineConfig {
    /// Parse and validate TOML text. No environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, apply `JOBGATE_*` overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: EngineConfig = toml::from_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `JOBGATE_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`:
    ///
    /// | variable | setting |
    /// |---|---|
    /// | `JOBGATE_MAX_CONCURRENT_JOBS` | `executor.max_concurrent_jobs` |
    /// | `JOBGATE_DEFAULT_TIMEOUT_MS` | `executor.default_timeout_ms` |
    /// | `JOBGATE_MAX_RETRIES` | `executor.max_retries` |
    /// | `JOBGATE_RETRY_DELAY_MS` | `executor.retry_delay_ms` |
    /// | `JOBGATE_SANDBOX_ROOT` | `sandbox.root` |
    /// | `JOBGATE_ISOLATION` | `sandbox.isolation` |
    /// | `JOBGATE_LOG_LEVEL` | `logging.level` |
    /// | `JOBGATE_LOG_FORMAT` | `logging.json` when `json` |
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("JOBGATE_MAX_CONCURRENT_JOBS") {
            self.executor.max_concurrent_jobs = parse_num("JOBGATE_MAX_CONCURRENT_JOBS", &v)?;
        }
        if let Some(v) = lookup("JOBGATE_DEFAULT_TIMEOUT_MS") {
            self.executor.default_timeout_ms = parse_num("JOBGATE_DEFAULT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("JOBGATE_MAX_RETRIES") {
            self.executor.max_retries = parse_num("JOBGATE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("JOBGATE_RETRY_DELAY_MS") {
            self.executor.retry_delay_ms = parse_num("JOBGATE_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("JOBGATE_SANDBOX_ROOT") {
            self.sandbox.root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("JOBGATE_ISOLATION") {
            self.sandbox.profile.isolation = match v.to_lowercase().as_str() {
                "process" => IsolationType::Process,
                "vm" => IsolationType::Vm,
                "container" => IsolationType::Container,
                "auto" => IsolationType::Auto,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "JOBGATE_ISOLATION".into(),
                        value: v,
                        reason: "expected process, vm, container or auto".into(),
                    })
                }
            };
        }
        if let Some(v) = lookup("JOBGATE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("JOBGATE_LOG_FORMAT") {
            self.logging.json = v.eq_ignore_ascii_case("json");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor_config().validate()?;
        if telemetry::parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".into(),
                value: self.logging.level.clone(),
                reason: "expected trace, debug, info, warn or error".into(),
            });
        }
        Ok(())
    }

    /// Executor settings with the `[sandbox]` profile as default.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_profile: self.sandbox.profile.clone(),
            ..self.executor.clone()
        }
    }

    /// Policies to register: the built-ins (if enabled) followed by every
    /// configured file, in order. Later entries replace earlier ones with
    /// the same name when registered.
    pub fn load_policies(&self) -> Result<Vec<Policy>, ConfigError> {
        let mut policies = if self.policies.builtin {
            builtin::all()
        } else {
            Vec::new()
        };
        for path in &self.policies.files {
            policies.extend(load_policy_file(path)?);
        }
        Ok(policies)
    }
}

/// Read a JSON file holding either one policy or an array of them.
pub fn load_policy_file(path: &Path) -> Result<Vec<Policy>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let wrap = |source| ConfigError::PolicyFile {
        path: path.to_path_buf(),
        source,
    };
    if text.trim_start().starts_with('[') {
        Policy::list_from_json(&text).map_err(wrap)
    } else {
        Policy::from_json(&text).map(|p| vec![p]).map_err(wrap)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.policies.builtin);
        assert_eq!(config.logging.level(), Level::INFO);
    }

    #[test]
    fn test_sandbox_section_flattens_profile() {
        let config = EngineConfig::from_toml_str(
            r#"
            [sandbox]
            root = "/srv/jobgate"
            isolation = "process"

            [sandbox.limits]
            memory_mb = 256

            [sandbox.cleanup]
            on_failure = true
            "#,
        )
        .unwrap();
        assert_eq!(config.sandbox.root, Some(PathBuf::from("/srv/jobgate")));
        let exec = config.executor_config();
        assert_eq!(exec.default_profile.isolation, IsolationType::Process);
        assert_eq!(exec.default_profile.limits.memory_mb, 256);
        assert_eq!(exec.default_profile.limits.cpu_percent, 50);
        assert!(exec.default_profile.cleanup.on_failure);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("[executor]\nmax_concurrent_jobs = 0").is_err());
        assert!(EngineConfig::from_toml_str("[sandbox.limits]\ncpu_percent = 150").is_err());
        assert!(EngineConfig::from_toml_str("[logging]\nlevel = \"loud\"").is_err());
        assert!(matches!(
            EngineConfig::from_toml_str("executor = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("JOBGATE_MAX_CONCURRENT_JOBS", "16"),
            ("JOBGATE_DEFAULT_TIMEOUT_MS", "2500"),
            ("JOBGATE_ISOLATION", "Process"),
            ("JOBGATE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.executor.max_concurrent_jobs, 16);
        assert_eq!(config.executor.default_timeout_ms, 2500);
        assert_eq!(config.sandbox.profile.isolation, IsolationType::Process);
        assert!(config.logging.json);
    }

    #[test]
    fn test_bad_override_names_variable() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "JOBGATE_MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("JOBGATE_MAX_RETRIES"));
    }

    #[test]
    fn test_load_policies_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("one.json");
        std::fs::write(
            &single,
            r#"{"name":"site","enforcement_mode":"audit","rules":[]}"#,
        )
        .unwrap();
        let many = dir.path().join("many.json");
        std::fs::write(
            &many,
            r#"[{"name":"a","enforcement_mode":"permissive"},{"name":"b","enforcement_mode":"strict"}]"#,
        )
        .unwrap();

        let config = EngineConfig {
            policies: PolicySection {
                builtin: false,
                files: vec![single, many],
            },
            ..EngineConfig::default()
        };
        let names: Vec<_> = config
            .load_policies()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["site", "a", "b"]);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/jobgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
