//! Tunable configuration for each subsystem, plus the handful of
//! environment variables the original collector reads once at startup.

use std::fmt;
use std::sync::OnceLock;

/// Socket receive-buffer sizing, read once from the environment.
///
/// `SILK_SOCKBUF_TOTAL` bounds the aggregate socket buffer space requested
/// across all listening sockets; `SILK_SOCKBUF_MIN` is the floor below which
/// a requested buffer size is not worth asking the kernel for. Both are
/// read once on first use and cached, matching the "read once on first use"
/// rule for this kind of process-wide tunable.
static SOCKBUF_ENV: OnceLock<SockbufEnv> = OnceLock::new();

#[derive(Debug, Clone, Copy)]
pub(crate) struct SockbufEnv {
    pub total: Option<usize>,
    pub min: Option<usize>,
}

pub(crate) fn sockbuf_env() -> SockbufEnv {
    *SOCKBUF_ENV.get_or_init(|| SockbufEnv {
        total: parse_env_usize("SILK_SOCKBUF_TOTAL"),
        min: parse_env_usize("SILK_SOCKBUF_MIN"),
    })
}

fn parse_env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Inert hook for site configuration discovery. The crate does not load or
/// interpret a site config file itself; this just surfaces where the
/// caller would find the two well-known environment variables.
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub config_file: Option<String>,
    pub data_rootdir: Option<String>,
}

impl SiteConfig {
    pub fn from_env() -> Self {
        Self {
            config_file: std::env::var("SILK_CONFIG_FILE").ok(),
            data_rootdir: std::env::var("SILK_DATA_ROOTDIR").ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryBlockPolicy {
    HalveEach,
    QuarterOfFirst,
    Fixed(usize),
}

/// Configuration for a [`crate::hash_table::HashTable`].
#[derive(Debug, Clone)]
pub struct HashTableConfig {
    pub key_len: usize,
    pub value_len: usize,
    pub initial_capacity: usize,
    pub load_factor_max: f32,
    pub secondary_block_policy: SecondaryBlockPolicy,
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            key_len: 4,
            value_len: 4,
            initial_capacity: 512,
            load_factor_max: 0.75,
            secondary_block_policy: SecondaryBlockPolicy::HalveEach,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidKeyLen(usize),
    InvalidValueLen(usize),
    InvalidCapacity(usize),
    InvalidLoadFactor(f32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidKeyLen(n) => write!(f, "invalid key length: {n}"),
            ConfigError::InvalidValueLen(n) => write!(f, "invalid value length: {n}"),
            ConfigError::InvalidCapacity(n) => write!(f, "invalid initial capacity: {n}"),
            ConfigError::InvalidLoadFactor(n) => write!(f, "invalid load factor: {n}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl HashTableConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_len == 0 {
            return Err(ConfigError::InvalidKeyLen(self.key_len));
        }
        if self.value_len == 0 {
            return Err(ConfigError::InvalidValueLen(self.value_len));
        }
        if self.initial_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(self.initial_capacity));
        }
        if !(0.0..1.0).contains(&self.load_factor_max) {
            return Err(ConfigError::InvalidLoadFactor(self.load_factor_max));
        }
        Ok(())
    }
}

/// Configuration for the external merge-sort ([`crate::sort`]).
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Maximum number of growth chunks the in-memory record buffer uses
    /// before it is considered full.
    pub max_chunks: usize,
    /// Soft cap, in bytes, on total in-memory buffer size.
    pub max_memory_bytes: usize,
    /// Maximum number of temp files merged concurrently in one pass.
    pub max_merge_fanin: usize,
    /// Record count floor below which buffer shrink-on-ENOMEM gives up.
    pub min_record_floor: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_chunks: 6,
            max_memory_bytes: (1024 * 1024 * 1024) * 2 - (1024 * 1024 * 100),
            max_merge_fanin: 1024,
            min_record_floor: 1000,
        }
    }
}

/// Configuration for a NetFlow v5 [`crate::netflow5::source::Source`].
#[derive(Debug, Clone)]
pub struct NetflowSourceConfig {
    pub poll_interval_ms: u64,
    pub circular_buffer_slots: usize,
    pub accept_any_peer: bool,
}

impl Default for NetflowSourceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            circular_buffer_slots: 512,
            accept_any_peer: false,
        }
    }
}
