//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Durable registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Container runtime configuration.
    #[serde(default)]
    pub container: ContainerConfig,
    /// Published-results configuration.
    #[serde(default)]
    pub results: ResultsConfig,
    /// Reaper configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a configuration suitable for tests: short timeouts, paths that
    /// callers are expected to point at a temp directory.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            registry: RegistryConfig {
                persist_path: PathBuf::from("cinderbox-test.db"),
            },
            container: ContainerConfig {
                base_image: "python-sandbox:test".to_string(),
                exec_timeout_secs: 5,
                pip_index_url: None,
                max_sandboxes_per_user: 5,
            },
            results: ResultsConfig {
                root: PathBuf::from("results"),
                file_ttl_secs: 3600,
            },
            reaper: ReaperConfig {
                interval_secs: 1,
                inactivity_threshold_secs: 3600,
            },
            auth: AuthConfig {
                session_signing_key: Some("test-signing-key".to_string()),
                token_expiry_mins: 300,
            },
        }
    }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Durable registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// SQLite database location for users and sandboxes.
    #[serde(default = "default_persist_path")]
    pub persist_path: PathBuf,
}

fn default_persist_path() -> PathBuf {
    PathBuf::from("./data/cinderbox.db")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            persist_path: default_persist_path(),
        }
    }
}

/// Container runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image every sandbox container is created from. Must carry a Python
    /// interpreter and pip on PATH, and a writable /app/results.
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Wall-clock limit for a single code or terminal execution, in seconds.
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    /// Optional package index passed to pip as --index-url.
    #[serde(default)]
    pub pip_index_url: Option<String>,
    /// Maximum live sandboxes per user.
    #[serde(default = "default_max_sandboxes_per_user")]
    pub max_sandboxes_per_user: u32,
}

fn default_base_image() -> String {
    "python-sandbox:latest".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    30
}

fn default_max_sandboxes_per_user() -> u32 {
    5
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            exec_timeout_secs: default_exec_timeout_secs(),
            pip_index_url: None,
            max_sandboxes_per_user: default_max_sandboxes_per_user(),
        }
    }
}

impl ContainerConfig {
    /// Execution timeout as a Duration.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Published-results configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Host-side directory published files are written under.
    #[serde(default = "default_results_root")]
    pub root: PathBuf,
    /// Lifetime of a published file, in seconds.
    #[serde(default = "default_file_ttl_secs")]
    pub file_ttl_secs: u64,
}

fn default_results_root() -> PathBuf {
    PathBuf::from("./results")
}

fn default_file_ttl_secs() -> u64 {
    3600
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            root: default_results_root(),
            file_ttl_secs: default_file_ttl_secs(),
        }
    }
}

impl ResultsConfig {
    /// File TTL as a Duration.
    pub fn file_ttl(&self) -> Duration {
        Duration::from_secs(self.file_ttl_secs)
    }
}

/// Reaper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Seconds between reaper ticks.
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// Idle seconds after which a sandbox is torn down.
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_inactivity_threshold_secs() -> u64 {
    3600
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval_secs(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
        }
    }
}

impl ReaperConfig {
    /// Tick interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Inactivity threshold as a Duration.
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC key for session tokens. Generated at boot when unset, which
    /// invalidates outstanding sessions across restarts.
    #[serde(default)]
    pub session_signing_key: Option<String>,
    /// Session token lifetime, in minutes.
    #[serde(default = "default_token_expiry_mins")]
    pub token_expiry_mins: i64,
}

fn default_token_expiry_mins() -> i64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_signing_key: None,
            token_expiry_mins: default_token_expiry_mins(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Env, Format, Toml};
    use figment::Figment;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.container.exec_timeout_secs, 30);
        assert_eq!(config.results.file_ttl_secs, 3600);
        assert_eq!(config.reaper.interval_secs, 300);
        assert_eq!(config.reaper.inactivity_threshold_secs, 3600);
        assert_eq!(config.auth.token_expiry_mins, 300);
        assert!(config.auth.session_signing_key.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: AppConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [server]
                bind = "127.0.0.1:9000"

                [container]
                base_image = "custom:1"
                exec_timeout_secs = 10
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.container.base_image, "custom:1");
        assert_eq!(config.container.exec_timeout(), Duration::from_secs(10));
        // Untouched sections keep their defaults.
        assert_eq!(config.reaper.interval_secs, 300);
    }

    #[test]
    fn env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CINDERBOX_RESULTS__FILE_TTL_SECS", "60");
            let config: AppConfig = Figment::new()
                .merge(Toml::string("[results]\nfile_ttl_secs = 120"))
                .merge(Env::prefixed("CINDERBOX_").split("__"))
                .extract()
                .unwrap();
            assert_eq!(config.results.file_ttl_secs, 60);
            Ok(())
        });
    }
}
