//! Embedding provider client and vector helpers.

use async_trait::async_trait;
use medgraph_shared::{EmbeddingConfig, MedGraphError, Result, resolve_api_key};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::http::{Transport, endpoint};

/// Retries for embedding requests; the section has no knob for it.
const EMBED_MAX_RETRIES: u32 = 2;

/// Turns texts into L2-normalised vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside each vector.
    fn model(&self) -> &str;

    /// Embed a batch, one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MedGraphError::Network("embedding provider returned no vector".into()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    transport: Transport,
    url: Url,
    model: String,
}

impl HttpEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(
                api_key,
                config.timeout_secs,
                EMBED_MAX_RETRIES,
                "embedding request",
            )?,
            url: endpoint(&config.base_url, "embeddings")?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut response: EmbeddingResponse =
            self.transport.post_json(&self.url, &request).await?;

        if response.data.len() != texts.len() {
            return Err(MedGraphError::Network(format!(
                "embedding provider returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = response
            .data
            .into_iter()
            .map(|d| {
                let mut v = d.embedding;
                normalize(&mut v);
                v
            })
            .collect();

        debug!(dim = vectors.first().map(Vec::len).unwrap_or(0), "embedded batch");
        Ok(vectors)
    }
}

/// Scale `v` to unit length in place. A zero vector stays zero.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0.0 for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_handles_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn embed_orders_by_index_and_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 2.0]},
                    {"index": 0, "embedding": [3.0, 4.0]}
                ]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            base_url: format!("{}/v1", server.uri()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config, "k".into()).unwrap();
        let vectors = embedder
            .embed(&["fever".to_string(), "cough".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);
        assert!((vectors[1][1] - 1.0).abs() < 1e-6);
        assert_eq!(embedder.model(), "BAAI/bge-small-zh-v1.5");
    }

    #[tokio::test]
    async fn vector_count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            base_url: server.uri(),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config, "k".into()).unwrap();
        assert!(embedder.embed_one("fever").await.is_err());
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config, "k".into()).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
