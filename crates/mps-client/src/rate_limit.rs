//! Per-marketplace fixed-window rate limiting.
//!
//! # Invariants
//! - Within any window, at most `limit` requests are admitted per marketplace.
//! - Requests that cannot be admitted wait in FIFO order; a request is never
//!   dropped silently.
//! - When the wait queue is already `max_queue_depth` deep, new requests fail
//!   fast with `RateLimitExceeded` instead of queueing.
//!
//! Windows use `tokio::time::Instant` so paused-clock tests observe the same
//! behaviour as production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use mps_config::RateLimitSettings;
use mps_schemas::{MarketplaceId, SyncError};
use serde::Serialize;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub limit: u32,
    pub window: Duration,
    pub max_queue_depth: u32,
}

impl WindowConfig {
    pub fn new(limit: u32, window: Duration, max_queue_depth: u32) -> Self {
        Self {
            limit: limit.max(1),
            window,
            max_queue_depth,
        }
    }
}

impl From<&RateLimitSettings> for WindowConfig {
    fn from(s: &RateLimitSettings) -> Self {
        Self::new(s.limit, Duration::from_millis(s.window_ms), s.max_queue_depth)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

// ---------------------------------------------------------------------------
// Window state
// ---------------------------------------------------------------------------

/// Current fixed window for one marketplace.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
}

/// Result of a single non-blocking admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Not admissible until the current window closes.
    Wait(Duration),
}

/// Snapshot for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub marketplace: MarketplaceId,
    pub count: u32,
    pub limit: u32,
    pub window_ms: u64,
    pub queued: u32,
}

struct Bucket {
    config: WindowConfig,
    window: Mutex<RateWindow>,
    /// Held by the head of the queue while it waits for a slot. tokio's
    /// mutex hands out the lock in acquisition order, which gives FIFO.
    gate: tokio::sync::Mutex<()>,
    queued: AtomicU32,
}

impl Bucket {
    fn new(config: WindowConfig) -> Self {
        Self {
            config,
            window: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
            queued: AtomicU32::new(0),
        }
    }

    fn admit(&self) -> Admission {
        let mut w = match self.window.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let window_end = w.window_start + self.config.window;
        if now >= window_end {
            w.window_start = now;
            w.count = 0;
        }
        if w.count < self.config.limit {
            w.count += 1;
            Admission::Granted
        } else {
            Admission::Wait((w.window_start + self.config.window).saturating_duration_since(now))
        }
    }

    fn snapshot(&self) -> RateWindow {
        match self.window.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Shared by every client; one bucket per marketplace.
pub struct RateLimiter {
    default_config: WindowConfig,
    overrides: HashMap<MarketplaceId, WindowConfig>,
    buckets: RwLock<HashMap<MarketplaceId, Arc<Bucket>>>,
}

impl RateLimiter {
    pub fn new(default_config: WindowConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Per-marketplace configuration; must be set before first use.
    pub fn with_config(mut self, m: MarketplaceId, config: WindowConfig) -> Self {
        self.overrides.insert(m, config);
        self
    }

    pub fn config_for(&self, m: MarketplaceId) -> WindowConfig {
        self.overrides.get(&m).copied().unwrap_or(self.default_config)
    }

    fn bucket(&self, m: MarketplaceId) -> Arc<Bucket> {
        if let Ok(map) = self.buckets.read() {
            if let Some(b) = map.get(&m) {
                return b.clone();
            }
        }
        let mut map = match self.buckets.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(m)
            .or_insert_with(|| Arc::new(Bucket::new(self.config_for(m))))
            .clone()
    }

    /// Non-blocking check. Counts the request when granted.
    ///
    /// Bypasses the wait queue; callers that need ordering use [`acquire`].
    ///
    /// [`acquire`]: RateLimiter::acquire
    pub fn admit(&self, m: MarketplaceId) -> Admission {
        self.bucket(m).admit()
    }

    /// Wait until a slot in the current or a later window is granted.
    ///
    /// # Errors
    /// `RateLimitExceeded` when `max_queue_depth` requests are already waiting.
    pub async fn acquire(&self, m: MarketplaceId) -> Result<(), SyncError> {
        let bucket = self.bucket(m);

        // Fast path: nobody waiting and a slot is free.
        if let Ok(_head) = bucket.gate.try_lock() {
            if bucket.admit() == Admission::Granted {
                return Ok(());
            }
        }

        let depth = bucket.queued.fetch_add(1, Ordering::SeqCst);
        if depth >= bucket.config.max_queue_depth {
            bucket.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(
                marketplace = %m,
                depth,
                max = bucket.config.max_queue_depth,
                "rate limit queue full, failing fast"
            );
            return Err(SyncError::rate_limited(format!(
                "local rate limit queue full ({} waiting)",
                depth
            ))
            .with_marketplace(m));
        }

        let head = bucket.gate.lock().await;
        loop {
            match bucket.admit() {
                Admission::Granted => break,
                Admission::Wait(d) => {
                    tracing::debug!(marketplace = %m, wait_ms = d.as_millis() as u64, "rate limited, waiting for next window");
                    tokio::time::sleep(d).await;
                }
            }
        }
        drop(head);
        bucket.queued.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stats(&self, m: MarketplaceId) -> RateLimitStats {
        let bucket = self.bucket(m);
        let w = bucket.snapshot();
        let count = if Instant::now() >= w.window_start + bucket.config.window {
            0
        } else {
            w.count
        };
        RateLimitStats {
            marketplace: m,
            count,
            limit: bucket.config.limit,
            window_ms: bucket.config.window.as_millis() as u64,
            queued: bucket.queued.load(Ordering::SeqCst),
        }
    }

    /// Stats for every marketplace that has seen traffic.
    pub fn all_stats(&self) -> Vec<RateLimitStats> {
        let mut ids: Vec<MarketplaceId> = match self.buckets.read() {
            Ok(map) => map.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        };
        ids.sort();
        ids.into_iter().map(|m| self.stats(m)).collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}
