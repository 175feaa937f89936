//! Parsing of `inspect` output.

use serde::Deserialize;

/// Subset of the machine description printed by `docker-machine inspect`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MachineInspect {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub driver_name: String,
    #[serde(default)]
    pub driver: DriverDetails,
}

/// Driver-specific block; only the fields every driver shares are kept.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DriverDetails {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "MachineName", default)]
    pub machine_name: String,
    #[serde(rename = "SSHUser", default)]
    pub ssh_user: String,
    #[serde(rename = "SSHPort", default)]
    pub ssh_port: Option<u16>,
}

impl MachineInspect {
    /// Parse raw inspect output.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim())
    }

    /// Public address of the machine, if the driver reported one.
    pub fn ip_address(&self) -> Option<&str> {
        let ip = self.driver.ip_address.trim();
        (!ip.is_empty()).then_some(ip)
    }
}
