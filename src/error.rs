use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `newsgate`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum NewsgateError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── LLM / Provider ──────────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Response recovery ───────────────────────────────────────────────
    #[error("recovery: {0}")]
    Recovery(#[from] RecoveryError),

    // ── Embedding ───────────────────────────────────────────────────────
    #[error("embedding: {0}")]
    Embedding(String),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

/// Fatal configuration problems. These surface at startup and abort router
/// construction; they are never produced mid-classification.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(
        "provider {provider} has no credential (set its API key env var or ProviderSpec.api_key)"
    )]
    MissingCredential { provider: String },

    #[error("provider {provider} credential is malformed: {reason}")]
    MalformedCredential { provider: String, reason: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── LLM / Provider errors ──────────────────────────────────────────────────

/// Transient provider-side failures. These are retried and escalated inside
/// the router; they never reach classification callers.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("provider {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("provider {provider} rate-limited")]
    RateLimited { provider: String },

    #[error("all providers exhausted after {attempts} attempts:\n{failures}")]
    Exhausted { attempts: u32, failures: String },
}

// ─── Response recovery errors ───────────────────────────────────────────────

/// Recovery parser failures. The router treats these exactly like transient
/// provider errors: the attempt fails and the chain moves on.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("empty or whitespace-only response")]
    Empty,

    #[error("no recovery strategy produced a structured value ({strategies_tried} tried)")]
    Unrecoverable { strategies_tried: u8 },

    #[error("recovered value failed schema validation: {0}")]
    Validation(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, NewsgateError>;
