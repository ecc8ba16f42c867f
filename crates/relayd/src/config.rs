//! Configuration for relayd

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// relayd - the aether relay daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "relayd")]
#[command(about = "aether event relay daemon")]
pub struct Config {
    /// Listen address for client connections
    #[arg(short, long, default_value = "0.0.0.0:9300")]
    pub listen: SocketAddr,

    /// Storage backend: "memory" or "sled"
    #[arg(long, default_value = "memory")]
    pub storage: String,

    /// Data directory for the sled backend (ignored for "memory")
    #[arg(long, default_value = "./data/relayd")]
    pub data_dir: PathBuf,

    /// Retention window for immutable-kind events, in nanoseconds.
    /// Zero disables expiry.
    #[arg(long, default_value = "0")]
    pub retention_ns: u64,

    /// Maximum accepted event size in bytes. Zero disables the check.
    #[arg(long, default_value = "65536")]
    pub max_event_size: usize,

    /// Required proof-of-work difficulty in leading zero bits. Zero
    /// disables the check.
    #[arg(long, default_value = "0")]
    pub pow_difficulty_bits: u32,

    /// Acceptance window around `now` for an event's `created_at`, in
    /// nanoseconds.
    #[arg(long, default_value = "60000000000")]
    pub window_ns: u64,

    /// Per-pubkey rate-limiter token bucket capacity.
    #[arg(long, default_value = "100")]
    pub rate_limit_capacity: u32,

    /// Per-pubkey rate-limiter refill rate, in tokens per second.
    #[arg(long, default_value = "10")]
    pub rate_limit_refill_per_second: f64,

    /// Gossip topic to echo admitted events under. Unset disables gossip.
    #[arg(long, env = "RELAYD_GOSSIP_TOPIC")]
    pub gossip_topic: Option<String>,

    /// Bootstrap gossip peers (comma-separated addresses)
    #[arg(long, value_delimiter = ',')]
    pub gossip_peers: Vec<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage != "memory" && self.storage != "sled" {
            anyhow::bail!("storage must be \"memory\" or \"sled\", got {:?}", self.storage);
        }
        if self.rate_limit_capacity == 0 {
            anyhow::bail!("rate_limit_capacity must be nonzero");
        }
        Ok(())
    }
}
