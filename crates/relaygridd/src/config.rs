//! relaygridd.toml configuration.
//!
//! ```toml
//! port = 3000
//! public_url = "http://10.0.0.5:3000"
//! data_dir = "/var/lib/relaygrid"
//!
//! [limits]
//! concurrency = 3
//! flood_threshold = 20
//!
//! [autoscale]
//! config = "/etc/relaygrid/asr.json"
//! cleanup_delay_secs = 60
//!
//! [[nodes]]
//! host = "10.0.0.7"
//! port = 3000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Port the HTTP API listens on.
    pub port: u16,
    /// Base URL nodes use to reach this daemon. Defaults to
    /// `http://localhost:{port}`.
    pub public_url: Option<String>,
    /// Directory for `nodes.json` and `tasks.json`.
    pub data_dir: PathBuf,
    /// Secret commit-webhook path segment. Generated at startup if absent.
    pub callback_token: Option<String>,
    pub refresh_interval_secs: u64,
    /// Per-request timeout for node HTTP calls.
    pub node_timeout_secs: u64,
    pub limits: LimitsConfig,
    pub autoscale: Option<AutoscaleConfig>,
    /// Static nodes added to the pool at startup.
    pub nodes: Vec<StaticNode>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            public_url: None,
            data_dir: PathBuf::from("data"),
            callback_token: None,
            refresh_interval_secs: 30,
            node_timeout_secs: 10,
            limits: LimitsConfig::default(),
            autoscale: None,
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Jobs a caller may start per minute. Absent = unlimited.
    pub concurrency: Option<u32>,
    /// Outstanding jobs before a caller counts as flooding. `<= 0` disables.
    pub flood_threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    /// Path to the provider JSON.
    pub config: PathBuf,
    #[serde(default = "default_docker_machine")]
    pub docker_machine: PathBuf,
    /// Where docker-machine keeps its state. Defaults to its own location.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default = "default_machine_prefix")]
    pub machine_prefix: String,
    #[serde(default)]
    pub cleanup_delay_secs: u64,
}

impl AutoscaleConfig {
    /// Defaults for everything but the provider JSON path.
    pub fn new(config: PathBuf) -> Self {
        Self {
            config,
            docker_machine: default_docker_machine(),
            storage_path: None,
            machine_prefix: default_machine_prefix(),
            cleanup_delay_secs: 0,
        }
    }
}

fn default_docker_machine() -> PathBuf {
    PathBuf::from("docker-machine")
}

fn default_machine_prefix() -> String {
    "relaygrid".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNode {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub token: Option<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    /// The configured callback token, or a fresh random one.
    pub fn resolve_callback_token(&self) -> anyhow::Result<String> {
        match self.callback_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => {
                let mut buf = [0u8; 16];
                getrandom::getrandom(&mut buf)
                    .map_err(|e| anyhow::anyhow!("generate callback token: {e}"))?;
                Ok(hex::encode(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.refresh_interval_secs, 30);
        assert!(config.autoscale.is_none());
        assert!(config.limits.concurrency.is_none());
        assert_eq!(config.public_url(), "http://localhost:3000");
    }

    #[test]
    fn full_config_parses() {
        let config: DaemonConfig = toml::from_str(
            r#"
            port = 8080
            public_url = "http://10.0.0.5:8080"
            data_dir = "/tmp/rg"
            callback_token = "secret"

            [limits]
            concurrency = 3
            flood_threshold = 20

            [autoscale]
            config = "asr.json"
            cleanup_delay_secs = 60

            [[nodes]]
            host = "10.0.0.7"
            port = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.concurrency, Some(3));
        assert_eq!(config.limits.flood_threshold, 20);
        let autoscale = config.autoscale.as_ref().unwrap();
        assert_eq!(autoscale.machine_prefix, "relaygrid");
        assert_eq!(autoscale.docker_machine, PathBuf::from("docker-machine"));
        assert_eq!(autoscale.cleanup_delay_secs, 60);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.resolve_callback_token().unwrap(), "secret");
    }

    #[test]
    fn missing_callback_token_is_generated() {
        let config = DaemonConfig::default();
        let a = config.resolve_callback_token().unwrap();
        let b = config.resolve_callback_token().unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn from_file_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaygridd.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(DaemonConfig::from_file(&path).is_err());
    }
}
