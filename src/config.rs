//! Push configuration and target derivation.
//!
//! A [`PushConfig`] is built once at startup (defaults, then an optional JSON
//! file, then command line overrides), validated, and shared immutably with
//! every delivery task.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// Default logging destination embedded in the `logging` command.
pub const DEFAULT_HOST_IP: &str = "192.168.1.61";

/// Default number of devices behind the terminal server.
pub const DEFAULT_DEVICE_COUNT: u16 = 10;

/// Default Telnet address of the devices.
pub const DEFAULT_TARGET_IP: &str = "192.168.56.101";

/// Default base port. Device `n` listens on `base_port + n`.
pub const DEFAULT_BASE_PORT: u16 = 5000;

/// Default connect and write timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// The built-in command batch: send all system logs to `host_ip`.
pub fn default_commands(host_ip: &str) -> Vec<String> {
    vec![
        "config t".to_string(),
        "logging ".to_string() + host_ip,
        "end".to_string(),
        "wr mem".to_string(),
    ]
}

/// Configuration of a single push run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PushConfig {
    /// Address of the log host, used by the default `logging` command.
    pub host_ip: String,

    /// Number of devices to configure.
    pub device_count: u16,

    /// Address shared by every device (usually a terminal server).
    pub target_ip: String,

    /// Device `n` (1-based) is reached on `base_port + n`.
    pub base_port: u16,

    /// Explicit command batch. `None` selects [`default_commands`].
    pub commands: Option<Vec<String>>,

    /// Connect timeout in seconds. `None` waits indefinitely.
    pub connect_timeout_secs: Option<u64>,

    /// Per-command write timeout in seconds. `None` waits indefinitely.
    pub write_timeout_secs: Option<u64>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            host_ip: DEFAULT_HOST_IP.to_string(),
            device_count: DEFAULT_DEVICE_COUNT,
            target_ip: DEFAULT_TARGET_IP.to_string(),
            base_port: DEFAULT_BASE_PORT,
            commands: None,
            connect_timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            write_timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl PushConfig {
    /// Parses a JSON document. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self, PushError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PushError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// JSON schema of the configuration document.
    pub fn json_schema() -> Result<String, PushError> {
        let schema = schemars::schema_for!(PushConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// The command batch sent to every target, in order.
    pub fn command_batch(&self) -> Vec<String> {
        match &self.commands {
            Some(commands) => commands.clone(),
            None => default_commands(&self.host_ip),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_secs.map(Duration::from_secs)
    }

    /// Derives the target list: one entry per device, ports
    /// `base_port + 1 ..= base_port + device_count`.
    ///
    /// Call [`PushConfig::validate`] first; ports that would overflow are
    /// skipped here.
    pub fn targets(&self) -> Vec<Target> {
        (1..=self.device_count)
            .filter_map(|offset| {
                self.base_port
                    .checked_add(offset)
                    .map(|port| Target::new(offset, &self.target_ip, port))
            })
            .collect()
    }

    /// Checks the configuration for values that cannot produce a valid run.
    pub fn validate(&self) -> Result<(), PushError> {
        if self.device_count == 0 {
            return Err(PushError::InvalidConfig(
                "device count must be at least 1".to_string(),
            ));
        }

        let target_ip = self.target_ip.trim();
        if target_ip.is_empty() || target_ip.chars().any(char::is_whitespace) {
            return Err(PushError::InvalidConfig(format!(
                "target address {:?} is not a host name or IP address",
                self.target_ip
            )));
        }

        if u32::from(self.base_port) + u32::from(self.device_count) > u32::from(u16::MAX) {
            return Err(PushError::InvalidConfig(format!(
                "base port {} with {} devices exceeds port {}",
                self.base_port,
                self.device_count,
                u16::MAX
            )));
        }

        if self.commands.is_none() && self.host_ip.trim().is_empty() {
            return Err(PushError::InvalidConfig(
                "host address is required by the default command batch".to_string(),
            ));
        }

        if self.commands.as_ref().is_some_and(Vec::is_empty) {
            return Err(PushError::InvalidConfig(
                "command batch is empty".to_string(),
            ));
        }

        for (index, command) in self.command_batch().iter().enumerate() {
            if command.contains(['\r', '\n']) {
                return Err(PushError::InvalidConfig(format!(
                    "command {index} ({command:?}) contains a line break"
                )));
            }
        }

        Ok(())
    }
}

/// One device reachable at a derived address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// 1-based position in the fleet (the port offset).
    pub index: u16,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(index: u16, host: &str, port: u16) -> Self {
        Self {
            index,
            host: host.trim().to_string(),
            port,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Splits a `host:port` address, accepting bracketed IPv6 hosts.
pub fn parse_address(addr: &str) -> Result<(String, u16), PushError> {
    let invalid = || PushError::InvalidAddress(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }

    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}
