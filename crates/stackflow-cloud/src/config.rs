//! Engine configuration: concurrency, retry budgets, timeouts, rollback

use crate::descriptor::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on concurrently provisioning nodes
pub const MAX_CONCURRENCY: usize = 8;

/// Engine settings, usually read from the `settings` block of a stack file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of nodes provisioned at once (capped at [`MAX_CONCURRENCY`])
    pub concurrency: usize,

    /// Retry budget and backoff between attempts
    pub retry: RetryConfig,

    /// Backoff for readiness polling
    pub readiness: WaitConfig,

    /// Per-kind overrides
    pub kinds: HashMap<ResourceKind, KindConfig>,

    /// Global run timeout in seconds
    pub run_timeout_secs: Option<u64>,

    /// What to do with resources created by a run that did not succeed
    pub rollback: RollbackPolicy,

    /// Directory the ledger is persisted to
    pub ledger_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: MAX_CONCURRENCY,
            retry: RetryConfig::default(),
            readiness: WaitConfig::default(),
            kinds: HashMap::new(),
            run_timeout_secs: None,
            rollback: RollbackPolicy::default(),
            ledger_dir: None,
        }
    }
}

impl EngineConfig {
    /// Effective worker limit, always within `1..=MAX_CONCURRENCY`
    pub fn worker_limit(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Attempts allowed for a node of this kind within one run
    pub fn max_attempts(&self, kind: ResourceKind) -> u32 {
        self.kinds
            .get(&kind)
            .and_then(|k| k.max_attempts)
            .unwrap_or(self.retry.max_attempts)
            .max(1)
    }

    /// Readiness timeout for this kind; `None` means no readiness polling
    pub fn readiness_timeout(&self, kind: ResourceKind) -> Option<Duration> {
        self.kinds
            .get(&kind)
            .and_then(|k| k.readiness_timeout_secs)
            .map(Duration::from_secs)
            .or_else(|| kind.default_readiness_timeout())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Per-kind overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindConfig {
    pub max_attempts: Option<u32>,
    pub readiness_timeout_secs: Option<u64>,
}

/// Retry configuration for provider operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per node per run
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before the given attempt (1-based); the first attempt runs immediately
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        Duration::from_millis(exponential_delay(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.backoff_multiplier,
            attempt - 2,
        ))
    }
}

/// Exponential backoff for readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Initial delay between describe calls (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between describe calls (milliseconds)
    pub max_delay_ms: u64,
    /// Exponential multiplier
    pub multiplier: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 15_000,
            multiplier: 2.0,
        }
    }
}

impl WaitConfig {
    /// Delay after the n-th (0-based) unsuccessful poll
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(exponential_delay(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            attempt,
        ))
    }
}

/// Never shorter than 1ms and never shrinking, whatever the stack file says
fn exponential_delay(initial_ms: u64, max_ms: u64, multiplier: f64, exponent: u32) -> u64 {
    let initial_ms = initial_ms.max(1);
    let max_ms = max_ms.max(initial_ms);
    let multiplier = multiplier.max(1.0);
    let delay = initial_ms as f64 * multiplier.powi(exponent.min(63) as i32);
    if delay.is_finite() {
        (delay as u64).clamp(initial_ms, max_ms)
    } else {
        max_ms
    }
}

/// Handling of resources created by a run that did not fully succeed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Keep everything that was created
    #[default]
    Retain,
    /// Delete what this run created, in reverse dependency order
    DestroyOnFailure,
}
