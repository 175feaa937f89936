//! Amazon EC2 instances.
//!
//! Creation attempts rotate through the configured availability zones so a
//! zone without capacity does not burn every retry. Spot requests and a
//! per-tier root volume size are supported.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::config::{self, CommonConfig};
use super::{Provider, S3_KEYS, tier};
use crate::error::AutoscaleResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    access_key: String,
    secret_key: String,
    region: String,
    #[serde(default)]
    zones: Vec<String>,
    #[serde(default)]
    ami: Option<String>,
    #[serde(default)]
    vpc: Option<String>,
    #[serde(default)]
    subnet: Option<String>,
    security_group: String,
    ssh_user: String,
    #[serde(default)]
    iam_role: Option<String>,
    #[serde(default)]
    monitoring: bool,
    #[serde(default)]
    spot: bool,
}

fn defaults() -> Value {
    json!({
        "region": "us-east-1",
        "securityGroup": "relaygrid",
        "sshUser": "ubuntu",
        "monitoring": false,
        "spot": false
    })
}

pub struct Aws {
    common: CommonConfig,
    settings: Settings,
}

impl Aws {
    pub fn from_config(user: Value) -> AutoscaleResult<Self> {
        let merged = config::merge(config::merge(config::common_defaults(), defaults()), user);
        config::require(&merged, &["accessKey", "secretKey", "region", "imageSizeMapping"])?;
        config::require(&merged, S3_KEYS)?;

        Ok(Self {
            common: CommonConfig::from_merged(&merged)?,
            settings: config::parse(&merged)?,
        })
    }

    /// Zone for a 1-based attempt, cycling through the list.
    fn zone(&self, attempt: u32) -> Option<&str> {
        let zones = &self.settings.zones;
        if zones.is_empty() {
            return None;
        }
        let index = attempt.saturating_sub(1) as usize % zones.len();
        Some(zones[index].as_str())
    }
}

#[async_trait]
impl Provider for Aws {
    fn name(&self) -> &str {
        "aws"
    }

    fn driver_name(&self) -> &str {
        "amazonec2"
    }

    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn rotation_count(&self) -> u32 {
        (self.settings.zones.len() as u32).max(1)
    }

    fn create_args(&self, job_size: u32, attempt: u32) -> AutoscaleResult<Vec<String>> {
        let tier = tier(&self.common, job_size)?;
        let s = &self.settings;

        let mut args = vec![
            "--amazonec2-access-key".to_string(),
            s.access_key.clone(),
            "--amazonec2-secret-key".to_string(),
            s.secret_key.clone(),
            "--amazonec2-region".to_string(),
            s.region.clone(),
            "--amazonec2-instance-type".to_string(),
            tier.slug.clone(),
            "--amazonec2-security-group".to_string(),
            s.security_group.clone(),
            "--amazonec2-ssh-user".to_string(),
            s.ssh_user.clone(),
        ];

        let optional = [
            ("--amazonec2-ami", s.ami.as_deref()),
            ("--amazonec2-vpc-id", s.vpc.as_deref()),
            ("--amazonec2-subnet-id", s.subnet.as_deref()),
            ("--amazonec2-iam-instance-profile", s.iam_role.as_deref()),
            ("--amazonec2-zone", self.zone(attempt)),
        ];
        for (flag, value) in optional {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }

        if let Some(storage) = tier.storage {
            args.push("--amazonec2-root-size".to_string());
            args.push(storage.to_string());
        }
        if s.spot {
            args.push("--amazonec2-request-spot-instance".to_string());
            if let Some(price) = tier.spot_price {
                args.push("--amazonec2-spot-price".to_string());
                args.push(price.to_string());
            }
        }
        if s.monitoring {
            args.push("--amazonec2-monitoring".to_string());
        }
        if !self.common.tags.is_empty() {
            let pairs: Vec<String> = self
                .common
                .tags
                .iter()
                .map(|t| format!("{t},true"))
                .collect();
            args.push("--amazonec2-tags".to_string());
            args.push(pairs.join(","));
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
            "provider": "aws",
            "accessKey": "AKIA",
            "secretKey": "secret",
            "region": "eu-west-1",
            "zones": ["a", "b"],
            "spot": true,
            "s3": {"accessKey": "a", "secretKey": "s", "endpoint": "s3.eu-west-1.amazonaws.com", "bucket": "b"},
            "imageSizeMapping": [
                {"maxImages": 100, "slug": "t3.medium", "storage": 60, "spotPrice": 0.05},
                {"maxImages": 1000, "slug": "m5.2xlarge", "storage": 200}
            ]
        })
    }

    #[test]
    fn attempts_rotate_through_zones() {
        let p = Aws::from_config(config()).unwrap();
        let zone = |attempt| {
            let args = p.create_args(10, attempt).unwrap();
            arg(&args, "--amazonec2-zone").map(str::to_string)
        };

        assert_eq!(zone(1).as_deref(), Some("a"));
        assert_eq!(zone(2).as_deref(), Some("b"));
        assert_eq!(zone(3).as_deref(), Some("a"));
        assert_eq!(p.rotation_count(), 2);
    }

    #[test]
    fn tier_drives_instance_type_storage_and_spot_price() {
        let p = Aws::from_config(config()).unwrap();

        let small = p.create_args(100, 1).unwrap();
        assert_eq!(arg(&small, "--amazonec2-instance-type"), Some("t3.medium"));
        assert_eq!(arg(&small, "--amazonec2-root-size"), Some("60"));
        assert!(small.contains(&"--amazonec2-request-spot-instance".to_string()));
        assert_eq!(arg(&small, "--amazonec2-spot-price"), Some("0.05"));

        let large = p.create_args(101, 1).unwrap();
        assert_eq!(arg(&large, "--amazonec2-instance-type"), Some("m5.2xlarge"));
        assert_eq!(arg(&large, "--amazonec2-root-size"), Some("200"));
        assert!(arg(&large, "--amazonec2-spot-price").is_none());
    }

    #[test]
    fn no_zones_means_no_zone_flag() {
        let mut c = config();
        c.as_object_mut().unwrap().remove("zones");
        let p = Aws::from_config(c).unwrap();

        let args = p.create_args(10, 3).unwrap();
        assert!(arg(&args, "--amazonec2-zone").is_none());
        assert_eq!(p.rotation_count(), 1);
        assert_eq!(p.driver_name(), "amazonec2");
        assert_eq!(arg(&args, "--amazonec2-tags"), Some("relaygrid,true"));
    }

    #[test]
    fn secret_key_is_required() {
        let mut c = config();
        c.as_object_mut().unwrap().remove("secretKey");
        assert!(matches!(
            Aws::from_config(c),
            Err(AutoscaleError::MissingKey(ref k)) if k == "secretKey"
        ));
    }
}
