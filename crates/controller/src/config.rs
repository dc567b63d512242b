//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// SSH defaults applied to routers
    pub ssh: SshConfig,

    /// WireGuard allocation policy
    pub wireguard: WireguardConfig,

    /// Subnet overlap policy
    pub subnets: SubnetConfig,

    /// Deployment job runner
    pub jobs: JobsConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_path: meshplane_common::default_store_path(),
            ssh: SshConfig::default(),
            wireguard: WireguardConfig::default(),
            subnets: SubnetConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Operator account used when a router is created without a user
    pub default_user: String,

    /// Port used when a router is created without one
    pub default_port: u16,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_user: "root".to_string(),
            default_port: 22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    /// First listen port tried
    pub port_range_start: u16,

    /// Exclusive upper bound of the listen port scan
    pub port_range_end: u32,

    /// Keep-alive interval (seconds) for NAT'd peers dialing exit peers
    pub persistent_keepalive: u16,
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            port_range_start: 20000,
            port_range_end: 65536,
            persistent_keepalive: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetConfig {
    /// Treat containment (10.0.0.0/24 vs 10.0.0.0/25) as overlap
    pub strict_overlap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunnerKind {
    Spool,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub runner: JobRunnerKind,

    /// Spool directory, defaults to `<store_path>/jobs`
    pub spool_dir: Option<PathBuf>,

    /// Job runner submission URL for the http runner
    pub endpoint: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            runner: JobRunnerKind::Spool,
            spool_dir: None,
            endpoint: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Get the job spool directory
    pub fn spool_dir(&self) -> PathBuf {
        self.jobs
            .spool_dir
            .clone()
            .unwrap_or_else(|| self.store_path.join("jobs"))
    }
}
