//! Cloud providers — how to size, create and provision a node machine.
//!
//! Each provider wraps a `docker-machine` driver. The shared behaviour
//! (size tiers, limits, backoff, the provisioning script, the storage
//! check) lives in default trait methods driven by [`CommonConfig`];
//! concrete providers contribute their driver name and creation flags.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use relaygrid_machine::MachineDriver;

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::storage::StorageProbe;

pub mod aws;
pub mod config;
pub mod digitalocean;
pub mod hetzner;
mod setup;

pub use aws::Aws;
pub use config::{CommonConfig, S3Config, SizeTier};
pub use digitalocean::DigitalOcean;
pub use hetzner::Hetzner;

/// Port the node engine listens on inside and outside its container.
pub const ENGINE_PORT: u16 = 3000;

/// Keys every provider needs for object storage.
pub(crate) const S3_KEYS: &[&str] = &["s3.accessKey", "s3.secretKey", "s3.endpoint", "s3.bucket"];

/// Values the provisioning script needs from the orchestrator.
#[derive(Debug, Clone)]
pub struct SetupContext {
    /// Externally reachable base URL of this orchestrator.
    pub public_url: String,
    /// Secret path segment of the commit webhook.
    pub callback_token: String,
    /// Access token the new node will require.
    pub node_token: String,
    /// Size of the job that triggered the creation.
    pub job_size: u32,
}

/// A cloud provider strategy.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Config name (`digitalocean`, `hetzner`, `aws`).
    fn name(&self) -> &str;

    /// `docker-machine` driver name.
    fn driver_name(&self) -> &str;

    fn common(&self) -> &CommonConfig;

    /// Driver flags for creating a machine for `job_size` on the
    /// 1-based `attempt`.
    fn create_args(&self, job_size: u32, attempt: u32) -> AutoscaleResult<Vec<String>>;

    /// Number of distinct placements (regions, zones) tried before
    /// backing off in earnest.
    fn rotation_count(&self) -> u32 {
        1
    }

    fn can_handle(&self, job_size: u32) -> bool {
        let common = self.common();
        common.tier_for(job_size).is_some()
            && (common.min_images <= 0 || i64::from(job_size) >= common.min_images)
    }

    /// Ceiling on autospawned machines. `None` means unlimited.
    fn machines_limit(&self) -> Option<usize> {
        usize::try_from(self.common().machines_limit).ok()
    }

    fn create_retries(&self) -> u32 {
        self.common().create_retries.max(1)
    }

    /// Seconds. `<= 0` disables.
    fn max_runtime(&self) -> i64 {
        self.common().max_runtime
    }

    /// Seconds. `<= 0` disables.
    fn max_upload_time(&self) -> i64 {
        self.common().max_upload_time
    }

    fn downloads_base_url(&self) -> String {
        self.common().s3.downloads_base_url()
    }

    fn engine_port(&self) -> u16 {
        ENGINE_PORT
    }

    /// Pause after a failed creation attempt.
    fn failure_sleep_time(&self, attempt: u32) -> Duration {
        let rotation = self.rotation_count();
        if attempt < rotation {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(10 * u64::from(attempt - rotation + 1))
        }
    }

    /// Provision a freshly created machine and start the node container.
    async fn setup_machine(
        &self,
        driver: &dyn MachineDriver,
        ctx: &SetupContext,
        machine: &str,
    ) -> AutoscaleResult<()> {
        setup::provision(self.common(), self.engine_port(), driver, ctx, machine).await
    }

    /// Check that object storage accepts writes with these credentials.
    async fn validate(&self, probe: &dyn StorageProbe) -> AutoscaleResult<()> {
        probe.check(&self.common().s3).await?;
        info!(provider = self.name(), "provider config validated");
        Ok(())
    }
}

/// Build a provider from a user config document.
pub fn from_config(user: Value) -> AutoscaleResult<Arc<dyn Provider>> {
    let name = user
        .get("provider")
        .and_then(Value::as_str)
        .ok_or_else(|| AutoscaleError::MissingKey("provider".to_string()))?
        .to_string();

    let provider: Arc<dyn Provider> = match name.as_str() {
        "digitalocean" => Arc::new(DigitalOcean::from_config(user)?),
        "hetzner" => Arc::new(Hetzner::from_config(user)?),
        "aws" => Arc::new(Aws::from_config(user)?),
        _ => return Err(AutoscaleError::UnknownProvider(name)),
    };
    Ok(provider)
}

/// Read and build a provider from a JSON file.
pub fn load(path: &Path) -> AutoscaleResult<Arc<dyn Provider>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AutoscaleError::Config(format!("{}: {e}", path.display())))?;
    let user: Value = serde_json::from_str(&raw)
        .map_err(|e| AutoscaleError::Config(format!("{}: {e}", path.display())))?;
    from_config(user)
}

/// Size tier for `job_size` or `CannotHandle`.
pub(crate) fn tier(common: &CommonConfig, job_size: u32) -> AutoscaleResult<&SizeTier> {
    common
        .tier_for(job_size)
        .ok_or(AutoscaleError::CannotHandle { job_size })
}

/// Value following `flag` in an argument list (test helper).
#[cfg(test)]
pub(crate) fn arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
