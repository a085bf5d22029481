//! Provider plumbing: the invocation trait, concrete HTTP clients, the
//! credential-checking registry, and the fallback-chain router.

// ── Infrastructure ───────────────────────────────────────────────────────────
pub mod registry;
pub mod router;
pub mod traits;
pub mod types;

// ── Provider implementations ────────────────────────────────────────────────
pub mod anthropic;
pub mod compatible;

pub use anthropic::AnthropicProvider;
pub use compatible::{AuthStyle, OpenAiCompatibleProvider};
pub use registry::{ProviderRegistry, resolve_api_key};
pub use router::{ProviderRouter, Routed};
pub use traits::Provider;
pub use types::{AttemptOutcome, CallBudget, InvocationAttempt, ProviderRole, ProviderSpec};

use std::time::Duration;

/// Shared reqwest client settings for every provider. Connection pooling and
/// keepalive matter here: a classification batch fires many short calls at
/// the same host.
pub(crate) fn build_provider_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
    // Per-call deadlines come from CallBudget, so no overall client timeout.
}
