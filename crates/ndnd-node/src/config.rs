//! TOML-based daemon configuration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ndnd_fw::Persistency;

use crate::error::DaemonError;

/// Top-level daemon configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub faces: FacesSection,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, DaemonError> {
        toml::from_str(s).map_err(|e| DaemonError::Config(format!("failed to parse config: {e}")))
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "plain" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Which selection policy forwards Interests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyChoice {
    #[default]
    WeightedRandom,
    Preferred,
}

/// The `[strategy]` section.
#[derive(Debug, Deserialize)]
pub struct StrategySection {
    #[serde(default)]
    pub policy: PolicyChoice,
    /// Interface name to selection weight. Weight 0 disables an
    /// interface; the highest weight is the preferred tier.
    #[serde(default)]
    pub interfaces: HashMap<String, u32>,
    /// Extra milliseconds a pending Interest outlives its lifetime.
    #[serde(default = "default_zombie_grace_ms")]
    pub zombie_grace_ms: u64,
    /// Nack unroutable Interests instead of holding them for replay.
    #[serde(default)]
    pub nack_unroutable: bool,
    /// Disable to let the host retransmit instead of the strategy.
    #[serde(default = "default_true")]
    pub retries: bool,
}

fn default_zombie_grace_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            policy: PolicyChoice::default(),
            interfaces: HashMap::new(),
            zombie_grace_ms: default_zombie_grace_ms(),
            nack_unroutable: false,
            retries: true,
        }
    }
}

impl StrategySection {
    #[must_use]
    pub fn zombie_grace(&self) -> Duration {
        Duration::from_millis(self.zombie_grace_ms)
    }
}

/// Face persistency as spelled in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistencyChoice {
    OnDemand,
    #[default]
    Persistent,
    Permanent,
}

impl From<PersistencyChoice> for Persistency {
    fn from(choice: PersistencyChoice) -> Self {
        match choice {
            PersistencyChoice::OnDemand => Persistency::OnDemand,
            PersistencyChoice::Persistent => Persistency::Persistent,
            PersistencyChoice::Permanent => Persistency::Permanent,
        }
    }
}

/// The `[faces]` section.
#[derive(Debug, Default, Deserialize)]
pub struct FacesSection {
    #[serde(default)]
    pub udp: Vec<UdpFaceEntry>,
    #[serde(default)]
    pub multicast: Vec<MulticastFaceEntry>,
}

/// A `[[faces.udp]]` entry: one unicast UDP face.
#[derive(Debug, Clone, Deserialize)]
pub struct UdpFaceEntry {
    /// Kernel interface the face follows.
    pub interface: String,
    #[serde(default = "default_udp_port")]
    pub local_port: u16,
    /// Explicit local address to bind. When absent, the face picks an
    /// address from the interface and rebinds as addresses change.
    #[serde(default)]
    pub local_address: Option<std::net::IpAddr>,
    pub remote: SocketAddr,
    #[serde(default)]
    pub persistency: PersistencyChoice,
    /// Idle seconds before an on-demand face closes.
    pub idle_timeout_secs: Option<u64>,
}

fn default_udp_port() -> u16 {
    6363
}

impl UdpFaceEntry {
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// A `[[faces.multicast]]` entry: one IPv4 multicast face.
#[derive(Debug, Clone, Deserialize)]
pub struct MulticastFaceEntry {
    pub interface: String,
    pub group: std::net::Ipv4Addr,
    #[serde(default = "default_multicast_port")]
    pub port: u16,
    #[serde(default)]
    pub local_address: Option<std::net::Ipv4Addr>,
    #[serde(default = "default_true")]
    pub bind_device: bool,
}

fn default_multicast_port() -> u16 {
    56363
}

/// A `[[routes]]` entry: a name prefix and the faces it forwards to,
/// referenced by position (1-based) across the `[faces]` lists, udp
/// entries first.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    pub prefix: String,
    pub faces: Vec<u64>,
}
