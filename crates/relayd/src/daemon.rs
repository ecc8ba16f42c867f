//! Daemon wiring: builds the storage backend and [`RelayCore`] from
//! [`Config`], and owns the background retention-prune tick and graceful
//! shutdown signal (a `shutdown_tx` broadcast channel, a
//! `spawn_prune_task` selecting against it).
//!
//! No concrete transport listener lives here — accepting connections and
//! decoding frames is a binding's job, built on [`crate::dispatch`] and
//! [`aether_net`]. This only owns the parts of the daemon that exist
//! regardless of which transport a deployment chooses.

use crate::config::Config;
use crate::core::RelayCore;
use crate::health::HealthState;
use crate::limits::RateLimiter;
use crate::storage::{EventStore, MemoryStore, Query, SledStore};
use crate::validator::ValidatorConfig;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}

pub struct Daemon {
    config: Config,
    core: Arc<RelayCore>,
    health: Arc<HealthState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        let store: Arc<dyn EventStore> = if config.storage == "sled" {
            Arc::new(SledStore::open(&config.data_dir, config.retention_ns, now_ns)?)
        } else {
            Arc::new(MemoryStore::new(config.retention_ns, now_ns))
        };

        let rate_limiter = RateLimiter::new(config.rate_limit_capacity, config.rate_limit_refill_per_second);
        let validator_config = ValidatorConfig {
            max_event_size: config.max_event_size,
            pow_difficulty_bits: config.pow_difficulty_bits,
            window_ns: config.window_ns,
        };

        let core = Arc::new(RelayCore::new(store, rate_limiter, validator_config, now_ns));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            core,
            health: Arc::new(HealthState::new()),
            shutdown_tx,
        })
    }

    pub fn core(&self) -> &Arc<RelayCore> {
        &self.core
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// Signal every background task (and, once a binding wires its own
    /// accept loop into `shutdown_rx`, every connection handler) to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run until a shutdown signal arrives. Drives the opportunistic
    /// retention-prune tick; a concrete transport binding runs its own
    /// accept loop alongside this, selecting on the same
    /// `subscribe_shutdown()` receiver.
    pub async fn run(&self) -> Result<(), DaemonError> {
        info!(listen = %self.config.listen, storage = %self.config.storage, "starting relayd");

        let prune_handle = self.spawn_prune_task();
        let mut shutdown_rx = self.subscribe_shutdown();
        shutdown_rx.recv().await.ok();
        info!("shutting down");

        prune_handle.abort();
        Ok(())
    }

    fn spawn_prune_task(&self) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let mut shutdown_rx = self.subscribe_shutdown();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("running retention-prune tick");
                        // Querying with no clauses walks the opportunistic
                        // sweep every backend runs on access; this just
                        // forces one even on an otherwise-idle relay.
                        let _ = core.query(&Query::default());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}
