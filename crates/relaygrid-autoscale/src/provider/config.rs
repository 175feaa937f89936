//! Provider configuration: default merging, required keys, shared settings.
//!
//! A provider config is a JSON document. The user's document is deep-merged
//! over the provider's defaults (objects merge key by key, everything else
//! is replaced), then checked for required keys before being parsed.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AutoscaleError, AutoscaleResult};

// ── Merging ───────────────────────────────────────────────────────

/// Deep-merge `user` over `defaults`. User values win.
pub fn merge(defaults: Value, user: Value) -> Value {
    match (defaults, user) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, user) => user,
    }
}

/// Fail with the first dotted path in `keys` that is absent, null, or an
/// empty string.
pub fn require(config: &Value, keys: &[&str]) -> AutoscaleResult<()> {
    for key in keys {
        let value = key
            .split('.')
            .try_fold(config, |node, part| node.get(part));
        let present = match value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(AutoscaleError::MissingKey((*key).to_string()));
        }
    }
    Ok(())
}

/// Parse a merged config section into `T`.
pub fn parse<T: serde::de::DeserializeOwned>(config: &Value) -> AutoscaleResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| AutoscaleError::Config(e.to_string()))
}

/// Defaults shared by every provider.
pub fn common_defaults() -> Value {
    serde_json::json!({
        "createRetries": 1,
        "machinesLimit": -1,
        "minImages": -1,
        "maxRuntime": -1,
        "maxUploadTime": -1,
        "addSwap": 0,
        "dockerImage": "opendronemap/nodeodm",
        "nodeSetupCmd": "",
        "tags": ["relaygrid"],
        "s3": {
            "acl": "public-read"
        }
    })
}

// ── Shared settings ───────────────────────────────────────────────

/// One row of the size table: the smallest machine for jobs up to
/// `max_images` images.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeTier {
    pub max_images: u32,
    pub slug: String,
    /// Root volume size in GB, where the provider supports it.
    #[serde(default)]
    pub storage: Option<u32>,
    /// Maximum spot bid, where the provider supports it.
    #[serde(default)]
    pub spot_price: Option<f64>,
}

/// Object storage the nodes upload results to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    /// Host (optionally `http://`/`https://` prefixed) of the S3 service.
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_acl")]
    pub acl: String,
    /// Signing region. Derived from the endpoint when absent.
    #[serde(default)]
    pub region: Option<String>,
}

fn default_acl() -> String {
    "public-read".to_string()
}

impl S3Config {
    /// Endpoint with any scheme prefix removed.
    pub fn endpoint_host(&self) -> &str {
        self.endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }

    /// Region used for request signing.
    pub fn signing_region(&self) -> String {
        if let Some(region) = self.region.as_deref().filter(|r| !r.is_empty()) {
            return region.to_string();
        }
        let host = self.endpoint_host();
        let mut labels = host.split('.');
        match (labels.next(), labels.next()) {
            // s3.us-west-2.amazonaws.com
            (Some("s3"), Some(region)) if region != "amazonaws" => region.to_string(),
            // s3-eu-west-1.amazonaws.com
            (Some(first), _) if first.starts_with("s3-") => first["s3-".len()..].to_string(),
            // nyc3.digitaloceanspaces.com
            (Some(first), Some(_)) if host.contains("digitaloceanspaces") => first.to_string(),
            _ => "us-east-1".to_string(),
        }
    }

    /// Public base URL for downloads, `https://{bucket}.{endpoint}`.
    pub fn downloads_base_url(&self) -> String {
        format!("https://{}.{}", self.bucket, self.endpoint_host())
    }
}

/// Settings every provider understands.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    pub provider: String,
    pub image_size_mapping: Vec<SizeTier>,
    #[serde(default = "minus_one")]
    pub min_images: i64,
    #[serde(default = "minus_one")]
    pub machines_limit: i64,
    #[serde(default = "one")]
    pub create_retries: u32,
    #[serde(default = "minus_one")]
    pub max_runtime: i64,
    #[serde(default = "minus_one")]
    pub max_upload_time: i64,
    #[serde(default)]
    pub add_swap: f64,
    pub docker_image: String,
    #[serde(default)]
    pub node_setup_cmd: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub s3: S3Config,
}

fn minus_one() -> i64 {
    -1
}

fn one() -> u32 {
    1
}

impl CommonConfig {
    /// Parse shared settings from a merged config and sort the size table
    /// ascending by capacity.
    pub fn from_merged(config: &Value) -> AutoscaleResult<Self> {
        let mut common: CommonConfig = parse(config)?;
        if common.image_size_mapping.is_empty() {
            return Err(AutoscaleError::MissingKey("imageSizeMapping".to_string()));
        }
        common.image_size_mapping.sort_by_key(|t| t.max_images);
        Ok(common)
    }

    /// Smallest tier that fits `job_size`.
    pub fn tier_for(&self, job_size: u32) -> Option<&SizeTier> {
        self.image_size_mapping
            .iter()
            .find(|t| t.max_images >= job_size)
    }
}
