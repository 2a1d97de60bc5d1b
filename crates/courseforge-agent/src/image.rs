use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::sync::Arc;

use crate::runtime::StandardAgent;
use crate::state::CourseState;
use crate::AgentError;

/// Substituted whenever the model fails to produce a usable image URL.
pub const FALLBACK_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1456513080510-7bf3a84b82f8";

/// First `https://` URL in the text, cut at whitespace or quotes.
pub fn extract_https_url(text: &str) -> Option<String> {
    let start = text.find("https://")?;
    let url: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
        .collect();
    (url.len() > "https://".len()).then_some(url)
}

/// Post-model hook for image agents: keep only the URL, fall back to the
/// hardcoded default when none is found.
pub fn enforce_image_url(text: &str) -> String {
    extract_https_url(text).unwrap_or_else(|| FALLBACK_IMAGE_URL.to_string())
}

/// Thin client for the Unsplash photo search API.
#[derive(Clone)]
pub struct UnsplashClient {
    client: reqwest::Client,
    access_key: String,
    api_base: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchPhoto>,
}

#[derive(Deserialize)]
struct SearchPhoto {
    urls: PhotoUrls,
}

#[derive(Deserialize)]
struct PhotoUrls {
    regular: String,
}

impl UnsplashClient {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self::with_base(access_key, "https://api.unsplash.com")
    }

    pub fn with_base(access_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_key: access_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the top search hit for `query`.
    pub async fn search_photo(&self, query: &str) -> Result<String> {
        let url = format!(
            "{}/search/photos?query={}&per_page=1",
            self.api_base,
            urlencoding::encode(query)
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .send()
            .await?
            .error_for_status()?;
        let parsed: SearchResponse = response.json().await?;
        parsed
            .results
            .into_iter()
            .next()
            .map(|photo| photo.urls.regular)
            .ok_or_else(|| anyhow!("no photo found for query: {query}"))
    }
}

/// Image agent: a standard agent augmented with photo search. The model is
/// asked for a short search phrase, the search result becomes the URL; when
/// search is unavailable the model's own output is used. Either way the
/// result is forced through [`enforce_image_url`].
#[derive(Clone)]
pub struct ImageAgent {
    agent: StandardAgent,
    search: Option<Arc<UnsplashClient>>,
}

impl ImageAgent {
    pub fn new(agent: StandardAgent, search: Option<UnsplashClient>) -> Self {
        Self {
            agent,
            search: search.map(Arc::new),
        }
    }

    pub async fn run(
        &self,
        user_id: &str,
        state: &CourseState,
        content: &str,
    ) -> Result<String, AgentError> {
        let model_output = self.agent.run(user_id, state, content).await?;

        if let Some(search) = &self.search {
            let phrase = extract_https_url(&model_output)
                .is_none()
                .then(|| model_output.trim())
                .filter(|p| !p.is_empty());
            if let Some(phrase) = phrase {
                match search.search_photo(phrase).await {
                    Ok(url) => return Ok(enforce_image_url(&url)),
                    Err(e) => {
                        tracing::warn!("photo search failed, falling back to model output: {e}");
                    }
                }
            }
        }

        Ok(enforce_image_url(&model_output))
    }
}
