//! DigitalOcean droplets.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::config::{self, CommonConfig};
use super::{Provider, S3_KEYS, tier};
use crate::error::AutoscaleResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    access_token: String,
    region: String,
    image: String,
    #[serde(default)]
    ssh_key: Option<SshKey>,
    #[serde(default)]
    monitoring: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SshKey {
    fingerprint: String,
    #[serde(default)]
    path: Option<String>,
}

fn defaults() -> Value {
    json!({
        "region": "nyc3",
        "image": "ubuntu-22-04-x64",
        "monitoring": false
    })
}

pub struct DigitalOcean {
    common: CommonConfig,
    settings: Settings,
}

impl DigitalOcean {
    pub fn from_config(user: Value) -> AutoscaleResult<Self> {
        let merged = config::merge(config::merge(config::common_defaults(), defaults()), user);
        config::require(&merged, &["accessToken", "imageSizeMapping"])?;
        config::require(&merged, S3_KEYS)?;

        Ok(Self {
            common: CommonConfig::from_merged(&merged)?,
            settings: config::parse(&merged)?,
        })
    }
}

#[async_trait]
impl Provider for DigitalOcean {
    fn name(&self) -> &str {
        "digitalocean"
    }

    fn driver_name(&self) -> &str {
        "digitalocean"
    }

    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn create_args(&self, job_size: u32, _attempt: u32) -> AutoscaleResult<Vec<String>> {
        let tier = tier(&self.common, job_size)?;
        let s = &self.settings;

        let mut args = vec![
            "--digitalocean-access-token".to_string(),
            s.access_token.clone(),
            "--digitalocean-region".to_string(),
            s.region.clone(),
            "--digitalocean-size".to_string(),
            tier.slug.clone(),
            "--digitalocean-image".to_string(),
            s.image.clone(),
        ];
        if let Some(key) = &s.ssh_key {
            args.push("--digitalocean-ssh-key-fingerprint".to_string());
            args.push(key.fingerprint.clone());
            if let Some(path) = &key.path {
                args.push("--digitalocean-ssh-key-path".to_string());
                args.push(path.clone());
            }
        }
        if !self.common.tags.is_empty() {
            args.push("--digitalocean-tags".to_string());
            args.push(self.common.tags.join(","));
        }
        if s.monitoring {
            args.push("--digitalocean-monitoring".to_string());
        }
        Ok(args)
    }
}
