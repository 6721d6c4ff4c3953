use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Worker poll cadence when no task is eligible.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
/// Hard cap applied to per-task timeouts from task attributes.
pub const DEFAULT_MAX_TASK_TIMEOUT: &str = "1h";

/// Top-level config (streamctl.toml + STREAMCTL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamctlConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Background worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between claim attempts when the queue is idle.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for any task's advisory timeout, as a duration string.
    #[serde(default = "default_max_task_timeout")]
    pub max_task_timeout: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_task_timeout: default_max_task_timeout(),
        }
    }
}

/// Cluster meta-node control tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Path to the control tool binary used for meta backups.
    #[serde(default = "default_metactl_path")]
    pub metactl_path: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            metactl_path: default_metactl_path(),
        }
    }
}

fn default_metactl_path() -> String {
    "metactl".to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_max_task_timeout() -> String {
    DEFAULT_MAX_TASK_TIMEOUT.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.streamctl/streamctl.db", home)
}

impl StreamctlConfig {
    /// Load config from a TOML file with STREAMCTL_* env var overrides.
    ///
    /// Checks the explicit path argument first, then ~/.streamctl/streamctl.toml.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: StreamctlConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("STREAMCTL_").split("_"))
            .extract()
            .map_err(|e| ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults on any load
    /// error instead of failing startup.
    pub fn load_or_default(config_path: Option<&str>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            Self::default()
        })
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.streamctl/streamctl.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = StreamctlConfig::default();
        assert_eq!(cfg.worker.poll_interval_secs, 1);
        assert_eq!(cfg.worker.max_task_timeout, "1h");
        assert!(cfg.database.path.ends_with("streamctl.db"));
    }

    #[test]
    fn toml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "streamctl.toml",
                r#"
                [database]
                path = "/tmp/ctl.db"

                [worker]
                poll_interval_secs = 5
                "#,
            )?;
            let cfg = StreamctlConfig::load(Some("streamctl.toml")).unwrap();
            assert_eq!(cfg.database.path, "/tmp/ctl.db");
            assert_eq!(cfg.worker.poll_interval_secs, 5);
            // untouched section keeps its default
            assert_eq!(cfg.worker.max_task_timeout, "1h");
            Ok(())
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("streamctl.toml", "[worker\npoll_interval_secs = 5")?;
            assert!(StreamctlConfig::load(Some("streamctl.toml")).is_err());
            let cfg = StreamctlConfig::load_or_default(Some("streamctl.toml"));
            assert_eq!(cfg.worker.poll_interval_secs, 1);
            assert_eq!(cfg.worker.max_task_timeout, "1h");
            Ok(())
        });
    }
}
