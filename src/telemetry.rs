use std::sync::Mutex;
use std::time::Duration;

use crate::llm::types::{AttemptOutcome, InvocationAttempt};
use crate::recovery::RecoveryStrategy;

/// Rough token estimate from character length. No external metering
/// dependency; four characters per token is close enough for cost accounting.
const CHARS_PER_TOKEN: f64 = 4.0;

pub fn estimate_cost_usd(prompt_chars: usize, response_chars: usize, usd_per_1k_tokens: f64) -> f64 {
    let tokens = (prompt_chars + response_chars) as f64 / CHARS_PER_TOKEN;
    tokens / 1000.0 * usd_per_1k_tokens
}

/// One record per routed call, folded from its attempts.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    /// Provider that ultimately produced the result, `None` on exhaustion.
    pub provider: Option<String>,
    pub attempts: Vec<InvocationAttempt>,
    pub strategy: Option<RecoveryStrategy>,
    pub latency: Duration,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub estimated_cost_usd: f64,
}

impl InvocationRecord {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn succeeded(&self) -> bool {
        self.attempts
            .last()
            .is_some_and(|a| a.outcome == AttemptOutcome::Success)
    }
}

/// Consumer of invocation records. Never required for correctness.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &InvocationRecord);
}

/// Default sink: one structured log line per invocation.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: &InvocationRecord) {
        tracing::info!(
            provider = record.provider.as_deref().unwrap_or("none"),
            attempts = record.attempt_count(),
            strategy = record.strategy.map(RecoveryStrategy::index),
            latency_ms = record.latency.as_millis() as u64,
            cost_usd = record.estimated_cost_usd,
            "provider invocation"
        );
    }
}

/// Sink that stores records for inspection; used by tests and cost reports.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<InvocationRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InvocationRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.records().iter().map(|r| r.estimated_cost_usd).sum()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, record: &InvocationRecord) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record.clone());
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`. For hosting processes that
/// have no subscriber of their own; calling it twice is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
