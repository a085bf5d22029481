#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::cast_precision_loss
)]

//! Resilient article classification and summarization core.
//!
//! Given a stream of content items and a trailing window of past items, the
//! pipeline decides per item whether it is a near-exact duplicate (SKIP), a
//! development of a covered story (UPDATE), or genuinely new (KEEP), and can
//! produce bullet-point summaries through the same provider machinery. The
//! design premise is that providers fail in creative ways; every layer is
//! built so that no item is ever silently dropped.

pub mod arbiter;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod item;
pub mod llm;
pub mod pipeline;
pub mod recovery;
pub mod screen;
pub mod similarity;
pub mod summarize;
pub mod telemetry;

pub use arbiter::ContextArbiter;
pub use config::PipelineConfig;
pub use embeddings::{EmbeddingProvider, HashingEmbedding, RemoteEmbedding};
pub use error::{ConfigError, LlmError, NewsgateError, RecoveryError, Result};
pub use item::{
    ClassificationDecision, ContentItem, Decision, PastItemIndex, ReliabilityTier, SummaryResult,
    UpdateKind,
};
pub use llm::{ProviderRegistry, ProviderRole, ProviderRouter, ProviderSpec, Routed};
pub use pipeline::Pipeline;
pub use recovery::{Recovered, RecoveryStrategy, ResponseSchema};
pub use summarize::Summarizer;
pub use telemetry::{InvocationRecord, RecordingSink, TelemetrySink, TracingSink};
