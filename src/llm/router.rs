//! Fallback-chain invocation core.
//!
//! One logical capability — "produce structured output for this prompt" —
//! tried across an ordered list of providers until one succeeds. The primary
//! gets retries with backoff; every fallback gets exactly one shot. Each raw
//! response runs through the recovery parser, and a parse failure is just
//! another attempt failure. Exhaustion never reaches callers of
//! [`ProviderRouter::invoke_or`]: they supply a synthesizer and always get a
//! value back.

use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::registry::ProviderRegistry;
use super::traits::is_non_retryable;
use super::types::{
    AttemptOutcome, InvocationAttempt, ProviderRole, ProviderSpec, response_excerpt,
};
use crate::config::ReliabilityConfig;
use crate::error::{ConfigError, LlmError};
use crate::recovery::{self, RecoveryStrategy, ResponseSchema};
use crate::telemetry::{InvocationRecord, TelemetrySink, estimate_cost_usd};

/// A structured value plus the route that produced it.
#[derive(Debug, Clone)]
pub struct Routed<T> {
    pub value: T,
    /// Provider that produced the value; `None` when synthesized locally.
    pub provider: Option<String>,
    /// Recovery strategy that decoded the response; `None` when synthesized.
    pub strategy: Option<RecoveryStrategy>,
    /// Multiplier callers apply to provider-reported confidence. Zero for
    /// synthesized results.
    pub confidence_discount: f64,
    /// Total attempts across the whole chain.
    pub attempts: u32,
    pub synthesized: bool,
}

pub struct ProviderRouter {
    specs: Vec<ProviderSpec>,
    registry: ProviderRegistry,
    reliability: ReliabilityConfig,
    sink: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
}

impl ProviderRouter {
    /// Build a router over `specs`, primary first. Credentials for every
    /// spec are checked here, before any network call — a missing or
    /// malformed key aborts construction. The registry is injected so tests
    /// can pre-seed in-memory providers.
    pub fn new(
        registry: ProviderRegistry,
        specs: Vec<ProviderSpec>,
        reliability: ReliabilityConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::Validation(
                "router requires at least one provider spec".into(),
            ));
        }
        for spec in &specs {
            if !registry.contains(&spec.name) {
                ProviderRegistry::validate(spec)?;
            }
        }

        let mut specs = specs;
        specs.sort_by_key(|spec| match spec.role {
            ProviderRole::Primary => 0,
            ProviderRole::Fallback => 1,
        });

        Ok(Self {
            specs,
            registry,
            reliability,
            sink,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie the router's in-flight calls and backoff sleeps to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.name.as_str())
    }

    /// Invoke the chain; on exhaustion, return the synthesized value instead
    /// of an error. This is the entrypoint classification and summary
    /// callers use — an item is never lost to a transient failure.
    pub async fn invoke_or<S, F>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries_primary: u32,
        synthesize: F,
    ) -> Routed<S::Output>
    where
        S: ResponseSchema,
        F: FnOnce() -> S::Output,
    {
        match self
            .invoke::<S>(system_prompt, user_prompt, max_retries_primary)
            .await
        {
            Ok(routed) => routed,
            Err(LlmError::Exhausted { attempts, failures }) => {
                tracing::warn!(
                    attempts,
                    "All providers exhausted, synthesizing fallback result"
                );
                tracing::debug!(failures = failures.as_str(), "Exhaustion detail");
                Routed {
                    value: synthesize(),
                    provider: None,
                    strategy: None,
                    confidence_discount: 0.0,
                    attempts,
                    synthesized: true,
                }
            }
            Err(other) => {
                // invoke() only returns Exhausted today; keep the safe
                // default if that ever changes.
                tracing::error!("Unexpected router error: {other}");
                Routed {
                    value: synthesize(),
                    provider: None,
                    strategy: None,
                    confidence_discount: 0.0,
                    attempts: 0,
                    synthesized: true,
                }
            }
        }
    }

    /// Invoke the chain and surface exhaustion to the caller.
    pub async fn invoke<S: ResponseSchema>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries_primary: u32,
    ) -> Result<Routed<S::Output>, LlmError> {
        let prompt_chars = system_prompt.len() + user_prompt.len();
        let started = Instant::now();
        let mut attempts: Vec<InvocationAttempt> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        'chain: for spec in &self.specs {
            let tries = match spec.role {
                ProviderRole::Primary => 1 + max_retries_primary,
                ProviderRole::Fallback => 1,
            };
            let mut backoff_ms = self.reliability.provider_backoff_ms.max(1);

            let provider = match self.registry.get_or_build(spec) {
                Ok(provider) => provider,
                Err(e) => {
                    // Specs were validated at construction; reaching this
                    // means the environment changed under us. Skip the spec.
                    tracing::warn!(provider = spec.name.as_str(), "Client build failed: {e}");
                    failures.push(format!("{}: client build failed: {e}", spec.name));
                    continue;
                }
            };

            for attempt in 0..tries {
                if self.cancel.is_cancelled() {
                    tracing::info!("Router cancelled, stopping provider chain");
                    break 'chain;
                }

                let attempt_no = attempts.len() as u32 + 1;
                let attempt_started = Instant::now();

                let call = provider.complete(Some(system_prompt), user_prompt, &spec.budget);
                let outcome = tokio::select! {
                    () = self.cancel.cancelled() => Err(CallFailure::Cancelled),
                    result = tokio::time::timeout(spec.budget.timeout(), call) => match result {
                        Err(_) => Err(CallFailure::Timeout),
                        Ok(Err(e)) => Err(CallFailure::Provider(e)),
                        Ok(Ok(raw)) => Ok(raw),
                    },
                };

                match outcome {
                    Ok(raw) => match recovery::recover::<S>(&raw) {
                        Ok(recovered) => {
                            if attempt > 0 {
                                tracing::info!(
                                    provider = spec.name.as_str(),
                                    attempt,
                                    "Provider recovered after retries"
                                );
                            }
                            attempts.push(InvocationAttempt {
                                provider: spec.name.clone(),
                                attempt: attempt_no,
                                duration: attempt_started.elapsed(),
                                outcome: AttemptOutcome::Success,
                                strategy: Some(recovered.strategy),
                                response_chars: raw.len(),
                                response_excerpt: Some(response_excerpt(&raw)),
                            });
                            let attempt_total = attempts.len() as u32;
                            self.sink.record(&InvocationRecord {
                                provider: Some(spec.name.clone()),
                                attempts,
                                strategy: Some(recovered.strategy),
                                latency: started.elapsed(),
                                prompt_chars,
                                response_chars: raw.len(),
                                estimated_cost_usd: estimate_cost_usd(
                                    prompt_chars,
                                    raw.len(),
                                    spec.usd_per_1k_tokens,
                                ),
                            });
                            return Ok(Routed {
                                value: recovered.value,
                                provider: Some(spec.name.clone()),
                                strategy: Some(recovered.strategy),
                                confidence_discount: recovered.confidence_discount,
                                attempts: attempt_total,
                                synthesized: false,
                            });
                        }
                        Err(recovery_err) => {
                            tracing::warn!(
                                provider = spec.name.as_str(),
                                attempt = attempt + 1,
                                "Response could not be recovered: {recovery_err}"
                            );
                            attempts.push(InvocationAttempt {
                                provider: spec.name.clone(),
                                attempt: attempt_no,
                                duration: attempt_started.elapsed(),
                                outcome: AttemptOutcome::Malformed,
                                strategy: None,
                                response_chars: raw.len(),
                                response_excerpt: Some(response_excerpt(&raw)),
                            });
                            failures.push(format!(
                                "{} attempt {}/{tries}: {recovery_err}",
                                spec.name,
                                attempt + 1
                            ));
                        }
                    },
                    Err(CallFailure::Cancelled) => {
                        tracing::info!("Router cancelled mid-call");
                        break 'chain;
                    }
                    Err(CallFailure::Timeout) => {
                        tracing::warn!(
                            provider = spec.name.as_str(),
                            timeout_secs = spec.budget.timeout_secs,
                            "Provider call timed out"
                        );
                        attempts.push(InvocationAttempt {
                            provider: spec.name.clone(),
                            attempt: attempt_no,
                            duration: attempt_started.elapsed(),
                            outcome: AttemptOutcome::Timeout,
                            strategy: None,
                            response_chars: 0,
                            response_excerpt: None,
                        });
                        failures.push(format!(
                            "{} attempt {}/{tries}: timed out after {}s",
                            spec.name,
                            attempt + 1,
                            spec.budget.timeout_secs
                        ));
                    }
                    Err(CallFailure::Provider(e)) => {
                        let non_retryable = is_non_retryable(&e);
                        attempts.push(InvocationAttempt {
                            provider: spec.name.clone(),
                            attempt: attempt_no,
                            duration: attempt_started.elapsed(),
                            outcome: AttemptOutcome::ProviderError,
                            strategy: None,
                            response_chars: 0,
                            response_excerpt: None,
                        });
                        failures.push(format!(
                            "{} attempt {}/{tries}: {e}",
                            spec.name,
                            attempt + 1
                        ));

                        if non_retryable {
                            tracing::warn!(
                                provider = spec.name.as_str(),
                                "Non-retryable error, switching provider"
                            );
                            break;
                        }
                    }
                }

                if attempt + 1 < tries {
                    tracing::warn!(
                        provider = spec.name.as_str(),
                        attempt = attempt + 1,
                        max_tries = tries,
                        "Provider call failed, retrying"
                    );
                    // Jitter avoids synchronized retry bursts across the
                    // concurrent items of a batch.
                    let jitter = rand::rng().random_range(0..=backoff_ms / 4);
                    let delay = std::time::Duration::from_millis(backoff_ms + jitter);
                    tokio::select! {
                        () = self.cancel.cancelled() => break 'chain,
                        () = tokio::time::sleep(delay) => {}
                    }
                    backoff_ms = backoff_ms
                        .saturating_mul(2)
                        .min(self.reliability.backoff_cap_ms);
                }
            }

            tracing::warn!(
                provider = spec.name.as_str(),
                "Switching to fallback provider"
            );
        }

        let attempt_total = attempts.len() as u32;
        self.sink.record(&InvocationRecord {
            provider: None,
            attempts,
            strategy: None,
            latency: started.elapsed(),
            prompt_chars,
            response_chars: 0,
            estimated_cost_usd: 0.0,
        });
        Err(LlmError::Exhausted {
            attempts: attempt_total,
            failures: failures.join("\n"),
        })
    }
}

enum CallFailure {
    Provider(anyhow::Error),
    Timeout,
    Cancelled,
}
