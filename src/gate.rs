//! Rate gate: per-target, per-method token buckets.
//!
//! Every `(target, scope)` pair owns its own [`TokenBucket`] behind its own
//! lock, so a slow target never throttles an unrelated one. The gate only
//! delays callers; it never drops or rejects a call that resolves to a
//! configured bucket.

use crate::config::{ConfigError, ParsingMode, RateConfig, RateScope, Target};
use log::trace;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

// Float slack when comparing accrued tokens against a whole permit.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled at `rps` tokens per second up to `capacity`.
///
/// Waiters queue on a fair (FIFO) async mutex and the head of the queue
/// sleeps while holding it, so permits are handed out strictly in request
/// order. Dropping a pending [`TokenBucket::acquire`] future releases its
/// place in the queue without consuming a token.
#[derive(Debug)]
pub struct TokenBucket {
    rps: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket. `rps` and `capacity` are validated by
    /// [`RateConfig`] before they get here.
    pub fn new(rps: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            rps,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rps(&self) -> f64 {
        self.rps
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rps).min(self.capacity);
        state.last_refill = now;
    }

    /// Time until the deficit of `state` is covered, rounded up to the next
    /// nanosecond so a sleep always moves the clock forward.
    fn wait_for_token(&self, state: &BucketState) -> Duration {
        let deficit = (1.0 - state.tokens).max(0.0);
        let nanos = (deficit / self.rps * 1e9).ceil() as u64;
        Duration::from_nanos(nanos.max(1))
    }

    /// Waits until a token is available, then consumes it.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            self.refill(&mut state, Instant::now());
            if state.tokens + TOKEN_EPSILON >= 1.0 {
                state.tokens = (state.tokens - 1.0).max(0.0);
                return;
            }
            let wait = self.wait_for_token(&state);
            trace!("token bucket empty, sleeping {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug)]
enum TargetBuckets {
    Blanket(TokenBucket),
    Method(HashMap<String, TokenBucket>),
}

/// Admission gate over every configured [`Target`].
///
/// Built once at start-up and shared (usually behind an `Arc`) by every
/// gateway; it is never mutated afterwards.
#[derive(Debug, Default)]
pub struct RateGate {
    targets: HashMap<String, TargetBuckets>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Self {
        let mut gate = Self::new();
        for target in targets {
            gate.register(&target.name, &target.rate);
        }
        gate
    }

    /// Adds (or replaces) the buckets for `target`.
    pub fn register(&mut self, target: &str, rate: &RateConfig) {
        let buckets = match rate.parsing_mode {
            ParsingMode::Blanket => {
                let rps = rate.specs.first().map(|s| s.rps).unwrap_or(f64::MAX);
                TargetBuckets::Blanket(TokenBucket::new(rps, rate.burst))
            }
            ParsingMode::Method => TargetBuckets::Method(
                rate.specs
                    .iter()
                    .filter_map(|spec| match &spec.scope {
                        RateScope::Method(name) => {
                            Some((name.clone(), TokenBucket::new(spec.rps, rate.burst)))
                        }
                        RateScope::Blanket => None,
                    })
                    .collect(),
            ),
        };
        self.targets.insert(target.to_string(), buckets);
    }

    /// Resolves the bucket guarding `method` on `target` without waiting.
    pub fn bucket(&self, target: &str, method: Option<&str>) -> Result<&TokenBucket, ConfigError> {
        let buckets = self
            .targets
            .get(target)
            .ok_or_else(|| ConfigError::UnknownTarget(target.to_string()))?;
        match buckets {
            TargetBuckets::Blanket(bucket) => Ok(bucket),
            TargetBuckets::Method(by_method) => {
                let method = method.unwrap_or_default();
                by_method
                    .get(&method.to_ascii_lowercase())
                    .ok_or_else(|| ConfigError::UnknownMethod {
                        target: target.to_string(),
                        method: method.to_string(),
                    })
            }
        }
    }

    /// Blocks until `target` (and `method`, in per-method mode) may proceed.
    ///
    /// Fails immediately, without waiting, when no ceiling is configured for
    /// the call.
    pub async fn acquire(&self, target: &str, method: Option<&str>) -> Result<(), ConfigError> {
        let bucket = self.bucket(target, method)?;
        bucket.acquire().await;
        Ok(())
    }
}
