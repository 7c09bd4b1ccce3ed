//! Pool configuration (§6): the recognized options and their defaults,
//! loadable programmatically or from a TOML file.

use std::{fs, path::Path};

use memtext_core::HashVariant;
use serde_derive::Deserialize;

fn default_init_conn() -> usize {
    3
}
fn default_min_conn() -> usize {
    3
}
fn default_max_conn() -> usize {
    10
}
fn default_max_idle_ms() -> u64 {
    180_000
}
fn default_maint_sleep_ms() -> u64 {
    5_000
}
fn default_socket_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_compress_threshold() -> usize {
    15_360
}
fn default_hash_variant() -> HashVariant {
    HashVariant::NewCompat
}

/// Pool configuration (§3, §6). `servers` is the only field without a
/// default — construction fails if it's empty.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub servers: Vec<String>,
    #[serde(default)]
    pub weights: Option<Vec<u32>>,
    #[serde(default = "default_init_conn")]
    pub init_conn: usize,
    #[serde(default = "default_min_conn")]
    pub min_conn: usize,
    #[serde(default = "default_max_conn")]
    pub max_conn: usize,
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
    #[serde(default = "default_maint_sleep_ms")]
    pub maint_sleep_ms: u64,
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub failover: bool,
    #[serde(default = "default_true")]
    pub nagle: bool,
    #[serde(default = "default_hash_variant")]
    pub hash_variant: HashVariant,
    #[serde(default = "default_true")]
    pub compress_enable: bool,
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: usize,
}

impl PoolConfig {
    /// A config with every option at its documented default, pointed at
    /// `servers`.
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            weights: None,
            init_conn: default_init_conn(),
            min_conn: default_min_conn(),
            max_conn: default_max_conn(),
            max_idle_ms: default_max_idle_ms(),
            maint_sleep_ms: default_maint_sleep_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            failover: default_true(),
            nagle: default_true(),
            hash_variant: default_hash_variant(),
            compress_enable: default_true(),
            compress_threshold: default_compress_threshold(),
        }
    }

    /// Parse a config from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Parse a config from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
