//! Machine provisioning: swap, custom setup command, node container.

use tracing::{debug, info, warn};

use relaygrid_machine::MachineDriver;

use super::config::CommonConfig;
use super::SetupContext;
use crate::error::AutoscaleResult;

const MEMINFO_CMD: &str = "awk '/MemTotal/ {print $2}' /proc/meminfo";

pub(super) async fn provision(
    common: &CommonConfig,
    port: u16,
    driver: &dyn MachineDriver,
    ctx: &SetupContext,
    machine: &str,
) -> AutoscaleResult<()> {
    if common.add_swap > 0.0 {
        // Swap is nice to have; a machine without it still works.
        if let Err(e) = add_swap(driver, machine, common.add_swap).await {
            warn!(machine, error = %e, "could not add swap");
        }
    }

    if !common.node_setup_cmd.trim().is_empty() {
        debug!(machine, "running node setup command");
        driver.ssh(machine, &common.node_setup_cmd).await?;
    }

    let max_images = common.tier_for(ctx.job_size).map(|t| t.max_images);
    driver
        .ssh(machine, &docker_run_command(common, port, ctx, max_images))
        .await?;
    info!(machine, image = %common.docker_image, "node container started");
    Ok(())
}

async fn add_swap(driver: &dyn MachineDriver, machine: &str, ratio: f64) -> AutoscaleResult<()> {
    let raw = driver.ssh(machine, MEMINFO_CMD).await?;
    let Some(gib) = swap_size_gib(&raw, ratio) else {
        warn!(machine, output = raw.trim(), "unreadable memory size, skipping swap");
        return Ok(());
    };

    let cmd = format!(
        "sudo fallocate -l {gib}G /swapfile && sudo chmod 600 /swapfile && \
         sudo mkswap /swapfile && sudo swapon /swapfile && \
         echo '/swapfile none swap sw 0 0' | sudo tee -a /etc/fstab"
    );
    driver.ssh(machine, &cmd).await?;
    info!(machine, swap_gib = gib, "swap added");
    Ok(())
}

/// `ceil(total_ram_gib * ratio)` from a `MemTotal` figure in KiB.
fn swap_size_gib(meminfo_kib: &str, ratio: f64) -> Option<u64> {
    let kib: u64 = meminfo_kib.trim().parse().ok()?;
    let gib = kib as f64 / (1024.0 * 1024.0);
    let size = (gib * ratio).ceil() as u64;
    (size > 0).then_some(size)
}

/// Shell command that starts the node container.
pub(super) fn docker_run_command(
    common: &CommonConfig,
    port: u16,
    ctx: &SetupContext,
    max_images: Option<u32>,
) -> String {
    let s3 = &common.s3;
    let webhook = format!(
        "{}/commit/{}",
        ctx.public_url.trim_end_matches('/'),
        ctx.callback_token
    );

    let mut parts = vec![
        "sudo docker run -d --restart always".to_string(),
        format!("-p {port}:3000"),
        quote(&common.docker_image),
        format!("--s3_access_key {}", quote(&s3.access_key)),
        format!("--s3_secret_key {}", quote(&s3.secret_key)),
        format!("--s3_endpoint {}", quote(&s3.endpoint)),
        format!("--s3_bucket {}", quote(&s3.bucket)),
        format!("--s3_acl {}", quote(&s3.acl)),
        format!("--webhook {}", quote(&webhook)),
        format!("--token {}", quote(&ctx.node_token)),
    ];
    if let Some(max) = max_images {
        parts.push(format!("--max_images {max}"));
    }
    parts.join(" ")
}

/// Single-quote a value for a POSIX shell.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::config::{common_defaults, merge};
    use serde_json::json;

    fn common() -> CommonConfig {
        let config = merge(
            common_defaults(),
            json!({
                "provider": "test",
                "imageSizeMapping": [{"maxImages": 200, "slug": "small"}],
                "s3": {"accessKey": "AK", "secretKey": "it's", "endpoint": "e.example", "bucket": "b"}
            }),
        );
        CommonConfig::from_merged(&config).unwrap()
    }

    fn ctx() -> SetupContext {
        SetupContext {
            public_url: "https://grid.example/".to_string(),
            callback_token: "cb123".to_string(),
            node_token: "nt456".to_string(),
            job_size: 10,
        }
    }

    #[test]
    fn docker_command_carries_webhook_token_and_credentials() {
        let cmd = docker_run_command(&common(), 3000, &ctx(), Some(200));

        assert!(cmd.starts_with("sudo docker run -d"));
        assert!(cmd.contains("-p 3000:3000 'opendronemap/nodeodm'"));
        assert!(cmd.contains("--webhook 'https://grid.example/commit/cb123'"));
        assert!(cmd.contains("--token 'nt456'"));
        assert!(cmd.contains("--s3_access_key 'AK'"));
        assert!(cmd.contains(r"--s3_secret_key 'it'\''s'"));
        assert!(cmd.ends_with("--max_images 200"));
    }

    #[test]
    fn swap_size_rounds_up() {
        // 4 GiB of RAM.
        assert_eq!(swap_size_gib("4194304\n", 1.0), Some(4));
        assert_eq!(swap_size_gib("4194304", 0.5), Some(2));
        assert_eq!(swap_size_gib("4000000", 1.0), Some(4));
        assert_eq!(swap_size_gib("garbage", 1.0), None);
        assert_eq!(swap_size_gib("0", 1.0), None);
    }
}
