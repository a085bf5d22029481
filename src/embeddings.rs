//! Embedding capability behind a pluggable trait.
//!
//! The similarity classifier only needs `embed(text) -> vector`. One precise
//! remote provider (any OpenAI-compatible `/v1/embeddings` endpoint) plus a
//! local hashing fallback that trades quality for availability: it keeps the
//! pipeline running with no embedding credential at all, at the cost of
//! purely lexical vectors.

use async_trait::async_trait;

/// Converts text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut results = self.embed(&[text]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding result"))
    }
}

// ── Remote OpenAI-compatible provider ────────────────────────

pub struct RemoteEmbedding {
    client: reqwest::Client,
    cached_embeddings_url: String,
    cached_auth_header: String,
    model: String,
    dims: usize,
}

impl RemoteEmbedding {
    pub fn new(base_url: &str, api_key: &str, model: &str, dims: usize) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: crate::llm::build_provider_client(),
            cached_embeddings_url: format!("{base}/v1/embeddings"),
            cached_auth_header: format!("Bearer {api_key}"),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedding {
    fn name(&self) -> &str {
        "remote"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.cached_embeddings_url)
            .header("Authorization", &self.cached_auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embedding HTTP request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Embedding API error {status}");
        }

        let json: serde_json::Value = resp.json().await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing 'data'"))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let values = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("Invalid embedding item"))?;
            #[allow(clippy::cast_possible_truncation)]
            let vec: Vec<f32> = values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vec);
        }
        Ok(embeddings)
    }
}

// ── Hashing fallback ─────────────────────────────────────────

/// Token-hashing bag-of-words embedder. Every token is FNV-hashed into one of
/// `dims` buckets and the resulting histogram is L2-normalized. Captures
/// vocabulary overlap only, so near-duplicates still score high while
/// paraphrases score lower than a real model would put them.
pub struct HashingEmbedding {
    dims: usize,
}

impl HashingEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn fnv1a64(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0_f32; self.dims];
        for token in crate::screen::normalize(text).split_whitespace() {
            let hash = Self::fnv1a64(token.as_bytes());
            let bucket = (hash % self.dims as u64) as usize;
            // Second hash bit picks the sign, which spreads collisions.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            buckets[bucket] += sign;
        }
        let norm = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut buckets {
                *x /= norm;
            }
        }
        buckets
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ── Factory ──────────────────────────────────────────────────

/// Build an embedding provider by name: "openai", "custom:<base_url>", or
/// anything else for the hashing fallback.
pub fn create_embedding_provider(
    provider: &str,
    api_key: Option<&str>,
    model: &str,
    dims: usize,
) -> Box<dyn EmbeddingProvider> {
    match provider {
        "openai" => Box::new(RemoteEmbedding::new(
            "https://api.openai.com",
            api_key.unwrap_or(""),
            model,
            dims,
        )),
        name if name.starts_with("custom:") => {
            let base_url = name.strip_prefix("custom:").unwrap_or("").trim();
            if base_url.starts_with("https://") || base_url.starts_with("http://") {
                Box::new(RemoteEmbedding::new(
                    base_url,
                    api_key.unwrap_or(""),
                    model,
                    dims,
                ))
            } else {
                tracing::warn!("Invalid custom embedding base URL, using hashing fallback");
                Box::new(HashingEmbedding::new(dims))
            }
        }
        _ => Box::new(HashingEmbedding::new(dims)),
    }
}

// ── Deterministic test embedder ──────────────────────────────

#[cfg(test)]
pub(crate) struct DeterministicEmbedding {
    dims: usize,
    seed: u64,
}

#[cfg(test)]
impl DeterministicEmbedding {
    pub(crate) fn with_seed(dims: usize, seed: u64) -> Self {
        Self { dims, seed }
    }

    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = x;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[allow(clippy::cast_precision_loss)]
    fn u64_to_unit_f32(x: u64) -> f32 {
        const U24_MAX: f32 = ((1u32 << 24) - 1) as f32;
        let top_u24: u32 = (x >> 40) as u32;
        (top_u24 as f32 / U24_MAX) * 2.0 - 1.0
    }
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for DeterministicEmbedding {
    fn name(&self) -> &str {
        "deterministic_test"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for &t in texts {
            let base = HashingEmbedding::fnv1a64(t.as_bytes()) ^ self.seed;
            let mut v = Vec::with_capacity(self.dims);
            for i in 0..self.dims {
                let mixed = Self::splitmix64(base ^ (i as u64));
                v.push(Self::u64_to_unit_f32(mixed));
            }
            out.push(v);
        }
        Ok(out)
    }
}
