//! Batch orchestration.
//!
//! Items are classified independently under a bounded-concurrency pool. The
//! past-item window is snapshotted once at batch start; appends by the owner
//! during the batch are invisible to it. Cancelling the batch token stops
//! new items from starting and propagates into in-flight provider calls;
//! affected items surface the KEEP default instead of disappearing.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::arbiter::ContextArbiter;
use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::item::{ClassificationDecision, ContentItem, PastItemIndex, SummaryResult};
use crate::llm::ProviderRouter;
use crate::screen::{self, ScreenedCandidate};
use crate::similarity;
use crate::summarize::Summarizer;

pub struct Pipeline {
    arbiter: Arc<ContextArbiter>,
    summarizer: Arc<Summarizer>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        router: Arc<ProviderRouter>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let arbiter = Arc::new(ContextArbiter::new(
            Arc::clone(&router),
            config.arbiter.clone(),
            config.screening.clone(),
        ));
        let summarizer = Arc::new(Summarizer::new(router));
        Self {
            arbiter,
            summarizer,
            embedder,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the batch to `token`. The same token should be passed to the
    /// router via [`ProviderRouter::with_cancellation`] so in-flight calls
    /// stop too.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Classify a batch of items against the past window.
    ///
    /// Output order matches input order regardless of completion order, and
    /// every input item yields a decision.
    pub async fn classify_batch(
        &self,
        items: Vec<ContentItem>,
        index: &PastItemIndex,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ClassificationDecision> {
        let snapshot: Arc<[ContentItem]> = index.snapshot(now).into();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_in_flight));
        tracing::info!(
            batch = items.len(),
            window = snapshot.len(),
            "Starting classification batch"
        );

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let snapshot = Arc::clone(&snapshot);
            let semaphore = Arc::clone(&semaphore);
            let arbiter = Arc::clone(&self.arbiter);
            let embedder = Arc::clone(&self.embedder);
            let config = self.config.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                // Acquire never fails: the semaphore is not closed.
                let Ok(_permit) = semaphore.acquire().await else {
                    return ClassificationDecision::keep_default(
                        "Worker pool closed before processing",
                        0.1,
                    );
                };
                if cancel.is_cancelled() {
                    return ClassificationDecision::keep_default(
                        "Batch cancelled before processing",
                        0.1,
                    );
                }
                classify_one(&item, &snapshot, &arbiter, embedder.as_ref(), &config).await
            }));
        }

        futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    tracing::error!("Classification task panicked: {e}");
                    ClassificationDecision::keep_default("Internal processing failure", 0.0)
                })
            })
            .collect()
    }

    /// Summarize a batch of items under the same bounded pool. Output order
    /// matches input order and every input item yields a result, synthesized
    /// locally if its task dies.
    pub async fn summarize_batch(&self, items: Vec<ContentItem>) -> Vec<SummaryResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_in_flight));
        let retries = self.config.reliability.provider_retries;

        let mut handles = Vec::with_capacity(items.len());
        let mut fallbacks = Vec::with_capacity(items.len());
        for item in items {
            fallbacks.push(item.clone());
            let semaphore = Arc::clone(&semaphore);
            let summarizer = Arc::clone(&self.summarizer);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return summarizer.summarize(&item, 0).await;
                };
                summarizer.summarize(&item, retries).await
            }));
        }

        futures_util::future::join_all(handles)
            .await
            .into_iter()
            .zip(fallbacks)
            .map(|(joined, item)| {
                joined.unwrap_or_else(|e| {
                    tracing::error!(item = item.id.as_str(), "Summary task panicked: {e}");
                    crate::summarize::synthesized_result(&item)
                })
            })
            .collect()
    }
}

/// One item's path through screener, classifier and arbiter.
async fn classify_one(
    item: &ContentItem,
    snapshot: &[ContentItem],
    arbiter: &ContextArbiter,
    embedder: &dyn EmbeddingProvider,
    config: &PipelineConfig,
) -> ClassificationDecision {
    let embedding = match &item.embedding {
        Some(embedding) => embedding.clone(),
        None => match embedder.embed_one(&item.comparison_text()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                // Without an embedding nothing ranks above the relevance
                // floor, so the item falls through to KEEP.
                tracing::warn!(item = item.id.as_str(), "Embedding failed: {e}");
                Vec::new()
            }
        },
    };

    // When the whole window carries embeddings the semantic ranking covers
    // it all; the lexical screener then only feeds the fast-path check.
    // Otherwise the lexical shortlist bounds the ranking cost.
    let whole_window = !snapshot.is_empty() && snapshot.iter().all(|p| p.embedding.is_some());
    let candidates: Vec<ScreenedCandidate> = if whole_window {
        snapshot
            .iter()
            .filter(|past| past.id != item.id)
            .map(|past| ScreenedCandidate {
                item: past.clone(),
                lexical: screen::score_pair(item, past),
            })
            .collect()
    } else {
        screen::screen(item, snapshot, &config.screening)
    };

    let ranked = similarity::rank(&embedding, candidates, &config.screening);
    arbiter
        .classify(item, &ranked, config.reliability.provider_retries)
        .await
}
