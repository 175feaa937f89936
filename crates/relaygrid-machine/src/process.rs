//! Registry of live child processes, keyed by machine name.
//!
//! Each running command holds a [`ProcessGuard`]; dropping the guard
//! decrements the machine's count. Callers can wait until a machine has no
//! in-flight commands, which is how teardown serializes behind a create.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

/// Tracks in-flight commands per machine.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    machines: Arc<Mutex<HashMap<String, watch::Sender<usize>>>>,
}

/// Marks one in-flight command. Released on drop.
pub struct ProcessGuard {
    registry: ProcessRegistry,
    machine: String,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command for `machine`.
    pub fn track(&self, machine: &str) -> ProcessGuard {
        let mut machines = self.machines.lock().expect("process registry lock");
        let tx = machines
            .entry(machine.to_string())
            .or_insert_with(|| watch::channel(0).0);
        tx.send_modify(|n| *n += 1);
        debug!(%machine, active = *tx.borrow(), "process started");

        ProcessGuard {
            registry: self.clone(),
            machine: machine.to_string(),
        }
    }

    fn release(&self, machine: &str) {
        let mut machines = self.machines.lock().expect("process registry lock");
        let idle = match machines.get(machine) {
            Some(tx) => {
                tx.send_modify(|n| *n = n.saturating_sub(1));
                *tx.borrow() == 0
            }
            None => false,
        };
        if idle {
            machines.remove(machine);
        }
        debug!(%machine, idle, "process finished");
    }

    /// Number of in-flight commands for `machine`.
    pub fn active(&self, machine: &str) -> usize {
        let machines = self.machines.lock().expect("process registry lock");
        machines.get(machine).map(|tx| *tx.borrow()).unwrap_or(0)
    }

    /// Machine names with at least one in-flight command.
    pub fn machines(&self) -> Vec<String> {
        let machines = self.machines.lock().expect("process registry lock");
        machines.keys().cloned().collect()
    }

    /// Wait until `machine` has no in-flight commands.
    pub async fn wait_idle(&self, machine: &str) {
        let rx = {
            let machines = self.machines.lock().expect("process registry lock");
            match machines.get(machine) {
                Some(tx) => tx.subscribe(),
                None => return,
            }
        };
        let mut rx = rx;
        // A closed channel means the entry was dropped at zero.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.registry.release(&self.machine);
    }
}
