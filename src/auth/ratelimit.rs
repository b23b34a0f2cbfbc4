//! Per-client rate limiter
//!
//! Each client address gets a token bucket that refills at a steady rate up
//! to a burst capacity. Entries are created on first sight and evicted by a
//! background sweep once the client has been idle long enough.
//!
//! All instants come from `tokio::time`, so tests can drive the limiter with
//! a paused clock.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// When false, every request is admitted
    pub enabled: bool,

    /// Steady-state refill rate
    pub requests_per_second: f64,

    /// Bucket capacity
    pub burst: u32,

    /// How often the sweep runs
    pub sweep_interval: Duration,

    /// Entries not seen for longer than this are evicted
    pub idle_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst: 4,
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(180),
        }
    }
}

/// Token bucket plus last-seen stamp for one client
#[derive(Debug, Clone)]
struct ClientEntry {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientEntry {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant, rate: f64, capacity: u32) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity as f64);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter keyed by client address
///
/// The table lives behind one mutex that is held only for a single admission
/// or a single sweep, never across an await point.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Mutex<HashMap<IpAddr, ClientEntry>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new rate limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request from `ip` may proceed
    ///
    /// Creates a full bucket on first sight, stamps last-seen and withdraws
    /// one token. Returns `false` when the bucket is empty.
    pub fn admit(&self, ip: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(ip)
            .or_insert_with(|| ClientEntry::new(self.config.burst, now));

        entry.refill(now, self.config.requests_per_second, self.config.burst);
        entry.last_seen = now;

        let admitted = entry.try_consume();
        if !admitted {
            debug!(client = %ip, "Rate limit bucket empty");
        }
        admitted
    }

    /// Evict entries idle for longer than the configured timeout
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_seen) <= idle_timeout);
        before - entries.len()
    }

    /// Get current number of tracked clients
    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().len()
    }

    /// Start the periodic sweep task
    ///
    /// The task runs until [`SweeperHandle::shutdown`] is called.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let limiter = Arc::clone(self);
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Rate limiter sweep stopping");
                        break;
                    }
                    _ = timer.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            debug!(evicted, remaining = limiter.tracked_clients(), "Evicted idle rate limit entries");
                        }
                    }
                }
            }
        });

        info!(
            interval_secs = period.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Rate limiter sweep started"
        );

        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running sweep task
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
