//! Hetzner Cloud servers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::config::{self, CommonConfig};
use super::{Provider, S3_KEYS, tier};
use crate::error::AutoscaleResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    api_token: String,
    location: String,
    image: String,
    #[serde(default)]
    ssh_key: Option<SshKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct SshKey {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

fn defaults() -> Value {
    json!({
        "location": "fsn1",
        "image": "ubuntu-22.04"
    })
}

pub struct Hetzner {
    common: CommonConfig,
    settings: Settings,
}

impl Hetzner {
    pub fn from_config(user: Value) -> AutoscaleResult<Self> {
        let merged = config::merge(config::merge(config::common_defaults(), defaults()), user);
        config::require(&merged, &["apiToken", "imageSizeMapping"])?;
        config::require(&merged, S3_KEYS)?;

        Ok(Self {
            common: CommonConfig::from_merged(&merged)?,
            settings: config::parse(&merged)?,
        })
    }
}

#[async_trait]
impl Provider for Hetzner {
    fn name(&self) -> &str {
        "hetzner"
    }

    fn driver_name(&self) -> &str {
        "hetzner"
    }

    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn create_args(&self, job_size: u32, _attempt: u32) -> AutoscaleResult<Vec<String>> {
        let tier = tier(&self.common, job_size)?;
        let s = &self.settings;

        let mut args = vec![
            "--hetzner-api-token".to_string(),
            s.api_token.clone(),
            "--hetzner-server-location".to_string(),
            s.location.clone(),
            "--hetzner-server-type".to_string(),
            tier.slug.clone(),
            "--hetzner-image".to_string(),
            s.image.clone(),
        ];
        if let Some(key) = &s.ssh_key {
            if let Some(id) = &key.id {
                args.push("--hetzner-existing-key-id".to_string());
                args.push(id.clone());
            }
            if let Some(path) = &key.path {
                args.push("--hetzner-existing-key-path".to_string());
                args.push(path.clone());
            }
        }
        for tag in &self.common.tags {
            args.push("--hetzner-server-label".to_string());
            args.push(format!("{tag}=true"));
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutoscaleError;
    use crate::provider::arg;

    fn config() -> Value {
        json!({
            "provider": "hetzner",
            "apiToken": "hz",
            "location": "hel1",
            "sshKey": {"id": "12", "path": "/keys/id"},
            "tags": ["grid", "odm"],
            "s3": {"accessKey": "a", "secretKey": "s", "endpoint": "s3.example", "bucket": "b"},
            "imageSizeMapping": [{"maxImages": 100, "slug": "cx31"}]
        })
    }

    #[test]
    fn create_args_use_location_and_server_type() {
        let p = Hetzner::from_config(config()).unwrap();
        let args = p.create_args(5, 2).unwrap();

        assert_eq!(p.driver_name(), "hetzner");
        assert_eq!(arg(&args, "--hetzner-api-token"), Some("hz"));
        assert_eq!(arg(&args, "--hetzner-server-location"), Some("hel1"));
        assert_eq!(arg(&args, "--hetzner-server-type"), Some("cx31"));
        assert_eq!(arg(&args, "--hetzner-image"), Some("ubuntu-22.04"));
        assert_eq!(arg(&args, "--hetzner-existing-key-id"), Some("12"));
        let labels = args.iter().filter(|a| *a == "--hetzner-server-label").count();
        assert_eq!(labels, 2);
    }

    #[test]
    fn api_token_is_required() {
        let mut c = config();
        c["apiToken"] = json!("");
        assert!(matches!(
            Hetzner::from_config(c),
            Err(AutoscaleError::MissingKey(ref k)) if k == "apiToken"
        ));
    }
}
