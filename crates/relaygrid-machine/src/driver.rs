//! Machine driver — runs lifecycle commands as child processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MachineError, MachineResult};
use crate::inspect::MachineInspect;
use crate::process::ProcessRegistry;

/// Lifecycle operations on cloud machines, addressed by machine name.
#[async_trait]
pub trait MachineDriver: Send + Sync {
    /// Create a machine with the given vendor driver and driver arguments.
    async fn create(&self, machine: &str, driver: &str, args: &[String]) -> MachineResult<()>;

    /// Describe an existing machine.
    async fn inspect(&self, machine: &str) -> MachineResult<MachineInspect>;

    /// Run a shell command on the machine and return its combined output.
    async fn ssh(&self, machine: &str, command: &str) -> MachineResult<String>;

    /// Public IP address of the machine.
    async fn ip(&self, machine: &str) -> MachineResult<String>;

    /// Destroy the machine and release its cloud resources.
    async fn destroy(&self, machine: &str) -> MachineResult<()>;
}

/// [`MachineDriver`] backed by the `docker-machine` CLI.
pub struct DockerMachine {
    binary: PathBuf,
    storage_path: Option<PathBuf>,
    registry: ProcessRegistry,
}

impl DockerMachine {
    /// Use `docker-machine` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker-machine")
    }

    /// Use a specific CLI binary.
    pub fn with_binary(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            storage_path: None,
            registry: ProcessRegistry::new(),
        }
    }

    /// Keep machine state (certificates, configs) under `path`.
    pub fn with_storage_path(mut self, path: impl AsRef<Path>) -> Self {
        self.storage_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// The registry of in-flight commands.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Run the CLI with `args`, registered under `machine`.
    async fn run(&self, machine: &str, args: Vec<String>) -> MachineResult<String> {
        let command = args.first().cloned().unwrap_or_default();
        let _guard = self.registry.track(machine);

        let mut cmd = Command::new(&self.binary);
        if let Some(storage) = &self.storage_path {
            cmd.arg("--storage-path").arg(storage);
        }
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(%machine, %command, "running machine command");
        let output = cmd.output().await.map_err(|source| MachineError::Spawn {
            machine: machine.to_string(),
            command: command.clone(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!(%machine, %command, code = ?output.status.code(), "machine command failed");
            return Err(MachineError::CommandFailed {
                machine: machine.to_string(),
                command,
                code: output.status.code(),
                output: combined.trim().to_string(),
            });
        }

        Ok(combined)
    }
}

impl Default for DockerMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineDriver for DockerMachine {
    async fn create(&self, machine: &str, driver: &str, args: &[String]) -> MachineResult<()> {
        let mut argv = vec!["create".to_string(), "--driver".to_string(), driver.to_string()];
        argv.extend(args.iter().cloned());
        argv.push(machine.to_string());

        info!(%machine, %driver, "creating machine");
        self.run(machine, argv).await?;
        info!(%machine, "machine created");
        Ok(())
    }

    async fn inspect(&self, machine: &str) -> MachineResult<MachineInspect> {
        let raw = self
            .run(machine, vec!["inspect".to_string(), machine.to_string()])
            .await?;
        MachineInspect::parse(&raw).map_err(|e| MachineError::Inspect {
            machine: machine.to_string(),
            reason: e.to_string(),
        })
    }

    async fn ssh(&self, machine: &str, command: &str) -> MachineResult<String> {
        self.run(
            machine,
            vec!["ssh".to_string(), machine.to_string(), command.to_string()],
        )
        .await
    }

    async fn ip(&self, machine: &str) -> MachineResult<String> {
        let out = self
            .run(machine, vec!["ip".to_string(), machine.to_string()])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn destroy(&self, machine: &str) -> MachineResult<()> {
        // Let a create or provisioning command on this machine finish first,
        // otherwise `rm` can run before the cloud resource exists.
        if self.registry.active(machine) > 0 {
            info!(%machine, "waiting for in-flight commands before destroy");
            self.registry.wait_idle(machine).await;
        }

        self.run(
            machine,
            vec![
                "rm".to_string(),
                "-f".to_string(),
                "-y".to_string(),
                machine.to_string(),
            ],
        )
        .await?;
        info!(%machine, "machine destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    // `echo` prints its arguments, which makes the argv we build observable.
    fn echo_driver() -> DockerMachine {
        DockerMachine::with_binary("echo")
    }

    #[tokio::test]
    async fn ip_trims_output() {
        let driver = echo_driver();
        assert_eq!(driver.ip("m1").await.unwrap(), "ip m1");
    }

    #[tokio::test]
    async fn ssh_passes_command_as_single_argument() {
        let driver = echo_driver();
        let out = driver.ssh("m1", "free -b").await.unwrap();
        assert_eq!(out.trim(), "ssh m1 free -b");
    }

    #[tokio::test]
    async fn create_puts_machine_name_last() {
        let driver = echo_driver();
        let args = vec!["--digitalocean-size".to_string(), "s-2vcpu-4gb".to_string()];
        driver.create("m1", "digitalocean", &args).await.unwrap();
        assert_eq!(driver.registry().active("m1"), 0);
    }

    #[tokio::test]
    async fn inspect_rejects_non_json_output() {
        let driver = echo_driver();
        let err = driver.inspect("m1").await.unwrap_err();
        assert!(matches!(err, MachineError::Inspect { .. }));
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failed() {
        let driver = DockerMachine::with_binary("false");
        let err = driver.destroy("m1").await.unwrap_err();
        match err {
            MachineError::CommandFailed { machine, command, code, .. } => {
                assert_eq!(machine, "m1");
                assert_eq!(command, "rm");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let driver = DockerMachine::with_binary("/nonexistent/relaygrid-docker-machine");
        let err = driver.ip("m1").await.unwrap_err();
        assert!(matches!(err, MachineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn destroy_waits_for_in_flight_commands() {
        let driver = Arc::new(echo_driver());
        let guard = driver.registry().track("m1");

        let destroy = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.destroy("m1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!destroy.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), destroy)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
