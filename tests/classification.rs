use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use newsgate::arbiter::JudgmentSchema;
use newsgate::config::ReliabilityConfig;
use newsgate::llm::{CallBudget, Provider, ProviderRegistry, ProviderSpec};
use newsgate::{
    ClassificationDecision, ContentItem, Decision, HashingEmbedding, PastItemIndex, Pipeline,
    PipelineConfig, ProviderRouter, RecordingSink, RecoveryStrategy, Summarizer, UpdateKind,
};

/// Plays back a fixed script of responses; the last entry repeats.
struct ScriptedProvider {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    script: Vec<Result<String, String>>,
}

impl ScriptedProvider {
    fn new(name: &'static str, script: Vec<Result<String, String>>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self {
            name,
            calls: Arc::clone(&calls),
            script,
        });
        (provider, calls)
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn complete<'a>(
        &'a self,
        _system_prompt: Option<&'a str>,
        _message: &'a str,
        _budget: &'a CallBudget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(call).or_else(|| self.script.last()) {
                Some(Ok(raw)) => Ok(raw.clone()),
                Some(Err(msg)) => anyhow::bail!(msg.clone()),
                None => anyhow::bail!("empty script"),
            }
        })
    }
}

fn fast_reliability() -> ReliabilityConfig {
    ReliabilityConfig {
        provider_retries: 1,
        provider_backoff_ms: 1,
        backoff_cap_ms: 4,
    }
}

fn router_with(
    providers: Vec<(ProviderSpec, Arc<ScriptedProvider>)>,
    sink: Arc<RecordingSink>,
) -> ProviderRouter {
    let registry = ProviderRegistry::new();
    let mut specs = Vec::with_capacity(providers.len());
    for (spec, provider) in providers {
        registry.register(spec.name.clone(), provider);
        specs.push(spec);
    }
    ProviderRouter::new(registry, specs, fast_reliability(), sink)
        .expect("router construction with pre-seeded providers")
}

fn pipeline_with(response: Result<String, String>) -> (Pipeline, Arc<AtomicUsize>) {
    let (provider, calls) = ScriptedProvider::new("scripted", vec![response]);
    let router = router_with(
        vec![(ProviderSpec::primary("scripted", "test-model"), provider)],
        Arc::new(RecordingSink::new()),
    );
    let config = PipelineConfig {
        reliability: fast_reliability(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config, Arc::new(router), Arc::new(HashingEmbedding::new(128)));
    (pipeline, calls)
}

fn article(id: &str, title: &str, body: &str) -> ContentItem {
    ContentItem::new(id, title, body, Utc::now(), "feed")
}

// ── End-to-end scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn verbatim_repost_is_skipped_without_a_provider_call() {
    let title = "Orion Labs announces acquisition of Meridian Systems";
    let body = "Orion Labs said on Tuesday it will acquire Meridian Systems for \
                an undisclosed sum, pending regulatory approval in two markets.";

    let embedder = HashingEmbedding::new(128);
    let embedding = newsgate::EmbeddingProvider::embed_one(&embedder, &format!("{title}\n{body}"))
        .await
        .unwrap();

    let mut index = PastItemIndex::new(7);
    index.push(article("past-1", title, body).with_embedding(embedding));

    let (pipeline, calls) = pipeline_with(Ok(r#"{"decision": "keep"}"#.to_string()));
    let decisions = pipeline
        .classify_batch(vec![article("cur-1", title, body)], &index, Utc::now())
        .await;

    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, Decision::Skip);
    assert_eq!(decisions[0].references, vec!["past-1".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn beta_release_of_announced_feature_is_an_update() {
    // Embeddings chosen so cosine(current, past) = 0.80 exactly.
    let current = article(
        "cur-2",
        "X ships feature Y (beta)",
        "The beta of feature Y is now available to external testers.",
    )
    .with_embedding(vec![1.0, 0.0]);
    let past = article(
        "past-2",
        "X announces feature Y development",
        "X said feature Y is under active development with no release date.",
    )
    .with_embedding(vec![0.8, 0.6]);

    let mut index = PastItemIndex::new(7);
    index.push(past);

    let judgment = serde_json::json!({
        "decision": "update",
        "reasoning": "The beta ships the feature that was previously only announced",
        "contextual_summary": [
            "Feature Y was announced as under development without a release date",
            "The beta release now makes feature Y available to external testers",
            "General availability and pricing have not been communicated yet",
            "The new article extends the earlier announcement rather than repeating it"
        ],
        "references": ["past-2"],
        "confidence": 0.88,
        "update_kind": "progress"
    });
    let (pipeline, calls) = pipeline_with(Ok(judgment.to_string()));
    let decisions = pipeline
        .classify_batch(vec![current], &index, Utc::now())
        .await;

    assert_eq!(decisions[0].decision, Decision::Update);
    assert_eq!(decisions[0].update_kind, Some(UpdateKind::Progress));
    assert_eq!(decisions[0].references, vec!["past-2".to_string()]);
    assert_eq!(decisions[0].contextual_summary.as_ref().unwrap().len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unrelated_item_is_kept_without_a_provider_call() {
    let current = article(
        "cur-3",
        "Rainfall records broken across the northern plains",
        "Meteorologists reported record rainfall totals over the weekend.",
    )
    .with_embedding(vec![1.0, 0.0, 0.0]);
    let past = article(
        "past-3",
        "Chip maker posts quarterly earnings",
        "The company beat analyst expectations on data center revenue.",
    )
    .with_embedding(vec![0.1, 0.995, 0.0]);

    let mut index = PastItemIndex::new(7);
    index.push(past);

    let (pipeline, calls) = pipeline_with(Ok(r#"{"decision": "skip"}"#.to_string()));
    let decisions = pipeline
        .classify_batch(vec![current], &index, Utc::now())
        .await;

    assert_eq!(decisions[0].decision, Decision::Keep);
    assert!(decisions[0].references.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fallback_chain_recovers_fenced_output_on_the_fourth_attempt() {
    // Primary answers in prose twice, the first fallback emits broken JSON,
    // the second fallback wraps a valid judgment in a fenced block.
    let (primary, _) = ScriptedProvider::new(
        "primary",
        vec![
            Ok("I believe this article should be kept.".to_string()),
            Ok("As mentioned, keeping it seems right.".to_string()),
        ],
    );
    let (fb1, _) = ScriptedProvider::new("fb1", vec![Ok(r#"{"decision": "keep", }"#.to_string())]);
    let (fb2, _) = ScriptedProvider::new(
        "fb2",
        vec![Ok(
            "```json\n{\"decision\": \"keep\", \"reasoning\": \"new story\", \"confidence\": 0.8}\n```"
                .to_string(),
        )],
    );

    let sink = Arc::new(RecordingSink::new());
    let router = router_with(
        vec![
            (ProviderSpec::primary("primary", "test-model"), primary),
            (ProviderSpec::fallback("fb1", "test-model"), fb1),
            (ProviderSpec::fallback("fb2", "test-model"), fb2),
        ],
        Arc::clone(&sink),
    );

    let routed = router
        .invoke::<JudgmentSchema>("system", "user", 1)
        .await
        .unwrap();
    assert_eq!(routed.provider.as_deref(), Some("fb2"));
    assert_eq!(routed.attempts, 4);
    assert_eq!(routed.strategy, Some(RecoveryStrategy::FencedBlock));

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt_count(), 4);
    assert!(records[0].succeeded());
}

// ── Failure-policy invariants ───────────────────────────────────────────────

#[tokio::test]
async fn exhausted_summary_is_synthesized_from_the_item() {
    let (provider, _) = ScriptedProvider::new(
        "failing",
        vec![Err("503 service unavailable".to_string())],
    );
    let router = router_with(
        vec![(ProviderSpec::primary("failing", "test-model"), provider)],
        Arc::new(RecordingSink::new()),
    );
    let summarizer = Summarizer::new(Arc::new(router));

    let item = article(
        "sum-1",
        "Meridian Systems opens new research campus",
        "The campus will host three hundred engineers working on photonics. \
         Construction finished two months ahead of the original schedule.",
    );
    let result = summarizer.summarize(&item, 1).await;

    assert!(result.synthesized);
    assert!(result.provider.is_none());
    assert_eq!(result.confidence, 0.0);
    assert!(!result.bullets.is_empty());
    assert!(result.bullets.iter().any(|b| b.contains("Meridian")));
    for bullet in &result.bullets {
        assert!(bullet.trim().len() >= 30);
    }
}

#[tokio::test]
async fn cancelled_batch_surfaces_keep_defaults() {
    let token = CancellationToken::new();
    token.cancel();

    let (provider, calls) = ScriptedProvider::new(
        "scripted",
        vec![Ok(r#"{"decision": "skip", "reasoning": "dup", "confidence": 0.9}"#.to_string())],
    );
    let router = router_with(
        vec![(ProviderSpec::primary("scripted", "test-model"), provider)],
        Arc::new(RecordingSink::new()),
    )
    .with_cancellation(token.clone());
    let config = PipelineConfig {
        reliability: fast_reliability(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config, Arc::new(router), Arc::new(HashingEmbedding::new(128)))
        .with_cancellation(token);

    let index = PastItemIndex::new(7);
    let decisions = pipeline
        .classify_batch(
            vec![article("a", "first story", "body"), article("b", "second story", "body")],
            &index,
            Utc::now(),
        )
        .await;

    assert_eq!(decisions.len(), 2);
    for decision in &decisions {
        assert_eq!(decision.decision, Decision::Keep);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// No matter how mangled the provider output, the final decision holds the
/// structural invariants: never an UPDATE without summary and references,
/// confidence always in range.
#[tokio::test]
async fn random_malformed_outputs_never_break_decision_invariants() {
    let fragments = [
        "Sure! Here's my analysis:",
        "{\"decision\": \"update\"",
        "\"confidence\": 2.7}",
        "- first bullet\n- second bullet",
        "I apologize, but I cannot classify this article.",
        "<<<>>>",
        "{\"decision\": \"update\", \"reasoning\": \"x\", \"confidence\": 0.9}",
        "null",
        "```\ndecision: skip\n```",
    ];

    let mut rng = rand::rng();
    for round in 0..20 {
        let parts: Vec<&str> = (0..rng.random_range(1..4))
            .filter_map(|_| fragments.choose(&mut rng).copied())
            .collect();
        let response = parts.join("\n");

        let current = article("cur", "Some ongoing story develops further", "body text here")
            .with_embedding(vec![1.0, 0.0]);
        let past = article("past", "Some ongoing story begins", "earlier body text")
            .with_embedding(vec![0.7, 0.714]);
        let mut index = PastItemIndex::new(7);
        index.push(past);

        let (pipeline, _) = pipeline_with(Ok(response.clone()));
        let decisions = pipeline
            .classify_batch(vec![current], &index, Utc::now())
            .await;

        let decision: &ClassificationDecision = &decisions[0];
        assert!(
            (0.0..=1.0).contains(&decision.confidence),
            "round {round}: confidence out of range for response {response:?}"
        );
        if decision.decision == Decision::Update {
            assert!(
                decision
                    .contextual_summary
                    .as_ref()
                    .is_some_and(|s| (3..=4).contains(&s.len())),
                "round {round}: update without summary for response {response:?}"
            );
            assert!(
                !decision.references.is_empty(),
                "round {round}: update without references for response {response:?}"
            );
        }
    }
}

#[tokio::test]
async fn config_defaults_drive_a_working_pipeline() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        b"[reliability]\nprovider_backoff_ms = 1\nbackoff_cap_ms = 2\n",
    )
    .unwrap();
    let config = assert_ok!(PipelineConfig::load(file.path()));
    assert_eq!(config.reliability.provider_backoff_ms, 1);

    let (provider, _) = ScriptedProvider::new(
        "scripted",
        vec![Ok(r#"{"decision": "keep", "reasoning": "new", "confidence": 0.9}"#.to_string())],
    );
    let registry = ProviderRegistry::new();
    registry.register("scripted", provider);
    let router = ProviderRouter::new(
        registry,
        vec![ProviderSpec::primary("scripted", "test-model")],
        config.reliability.clone(),
        Arc::new(RecordingSink::new()),
    )
    .unwrap();
    let pipeline = Pipeline::new(config, Arc::new(router), Arc::new(HashingEmbedding::new(64)));

    let decisions = pipeline
        .classify_batch(
            vec![article("solo", "a story with no history", "body")],
            &PastItemIndex::new(7),
            Utc::now(),
        )
        .await;
    assert_eq!(decisions[0].decision, Decision::Keep);
}
