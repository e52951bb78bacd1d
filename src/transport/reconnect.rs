//! Client side of the connection lifecycle
//!
//! Connects to the tunnelled socket, runs the sync loop on the stream and
//! reconnects with exponential backoff when the connection drops. Retries
//! are unbounded; only the delay between them is capped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clipboard::SelectionDisplay;
use crate::config::ReconnectConfig;
use crate::sync::engine::shutdown_requested;
use crate::sync::{SyncEngine, SyncOutcome};

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Jitter factor to randomize delays (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectionConfig {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }
}

/// Exponential backoff delay with jitter for the `failures`-th
/// consecutive failure (1-based).
pub fn calculate_backoff_delay(config: &ReconnectionConfig, failures: u32) -> Duration {
    let base_delay = config.initial_delay.as_secs_f64();
    let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
    let backoff_delay = base_delay * config.backoff_multiplier.powi(exponent);

    let clamped_delay = backoff_delay.min(config.max_delay.as_secs_f64());

    let jitter_range = clamped_delay * config.jitter_factor;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
    let final_delay = (clamped_delay + jitter).max(0.0);

    Duration::from_secs_f64(final_delay)
}

/// Keeps a client connected to the server for as long as it runs.
pub struct ReconnectionManager {
    socket_path: PathBuf,
    config: ReconnectionConfig,
    /// Consecutive failures since the last successful connection
    failures: u32,
    /// Total connection attempts
    attempts: u32,
}

impl ReconnectionManager {
    pub fn new(socket_path: impl Into<PathBuf>, config: ReconnectionConfig) -> Self {
        Self {
            socket_path: socket_path.into(),
            config,
            failures: 0,
            attempts: 0,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Connect and synchronize until the session ends for good.
    ///
    /// Returns the outcome of the last session on goodbye or shutdown and
    /// the first error that is not worth retrying.
    pub async fn run<D>(
        &mut self,
        engine: &mut SyncEngine<D>,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<SyncOutcome>
    where
        D: SelectionDisplay,
    {
        loop {
            if *shutdown.borrow() {
                return Ok(SyncOutcome::Shutdown);
            }

            // Whatever the previous server saw is irrelevant to this one.
            engine.guard_mut().clear_all();
            self.attempts += 1;
            debug!(
                "Connecting to {} (attempt {})",
                self.socket_path.display(),
                self.attempts
            );

            let result = match super::connect(&self.socket_path).await {
                Ok(stream) => {
                    info!("Connected to {}", self.socket_path.display());
                    self.failures = 0;
                    engine.run(stream, shutdown.clone()).await
                }
                Err(e) => Err(e.into()),
            };

            let error = match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            self.failures = self.failures.saturating_add(1);
            let delay = calculate_backoff_delay(&self.config, self.failures);
            warn!("{}; reconnecting in {:.1?}", error, delay);

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => return Ok(SyncOutcome::Shutdown),
            }
        }
    }
}
