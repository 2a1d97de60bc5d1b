use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult>;
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
}

/// Talks to an OpenAI-compatible `/embeddings` endpoint serving the
/// configured sentence-embedding model.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
    model: String,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                model: self.model.clone(),
                dimensions: self.dimensions,
            });
        }

        let endpoint = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let mut builder = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = builder.send().await?.error_for_status()?;
        let parsed: EmbedResponse = response.json().await?;

        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        for (expected, item) in data.iter().enumerate() {
            if item.index != expected {
                return Err(anyhow!(
                    "missing or duplicated embedding index: expected {expected}, got {}",
                    item.index
                ));
            }
        }

        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|item| item.embedding).collect();
        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            ));
        }
        if embeddings.iter().any(|e| e.len() != self.dimensions) {
            return Err(anyhow!(
                "embedding dimensions mismatch with configured dimensions {}",
                self.dimensions
            ));
        }

        Ok(EmbeddingResult {
            embeddings,
            model: parsed.model,
            dimensions: self.dimensions,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic offline embedder. Identical inputs map to identical vectors,
/// so exact-text lookups still work without a real model.
#[derive(Clone)]
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn component(text: &str, index: usize) -> f32 {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(index.to_le_bytes());
        let hash = hasher.finalize();
        let value = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts
            .iter()
            .map(|text| (0..self.dims).map(|i| Self::component(text, i)).collect())
            .collect();
        Ok(EmbeddingResult {
            embeddings,
            model: "hash".to_string(),
            dimensions: self.dims,
        })
    }

    fn model_id(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(8);
        let input = vec!["same text".to_string()];
        let first = provider.embed(&input).await.unwrap();
        let second = provider.embed(&input).await.unwrap();
        assert_eq!(first.embeddings, second.embeddings);
        assert_eq!(first.embeddings[0].len(), 8);
    }

    #[tokio::test]
    async fn hash_provider_distinguishes_texts() {
        let provider = HashEmbeddingProvider::new(16);
        let result = provider
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(result.embeddings[0], result.embeddings[1]);
    }

    #[tokio::test]
    async fn http_provider_parses_and_orders_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.5, 0.6], "index": 1},
                    {"embedding": [0.1, 0.2], "index": 0}
                ],
                "model": "all-MiniLM-L6-v2"
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(server.uri(), None, "all-MiniLM-L6-v2", 2);
        let result = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(result.embeddings[0], vec![0.1, 0.2]);
        assert_eq!(result.embeddings[1], vec![0.5, 0.6]);
        assert_eq!(result.model, "all-MiniLM-L6-v2");
    }

    #[tokio::test]
    async fn http_provider_rejects_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
                "model": "all-MiniLM-L6-v2"
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(server.uri(), None, "all-MiniLM-L6-v2", 2);
        let err = provider.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("dimensions mismatch"));
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let provider = HttpEmbeddingProvider::new("http://unreachable.invalid", None, "m", 2);
        let result = provider.embed(&[]).await.unwrap();
        assert!(result.embeddings.is_empty());
    }
}
