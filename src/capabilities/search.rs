//! Tavily web search adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, http_client, WebSearch};
use crate::error::CapabilityError;

/// Tavily search endpoint.
const TAVILY_API_URL: &str = "https://api.tavily.com/search";

const CAPABILITY: &str = "tavily";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// One search result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Web search through the Tavily API.
pub struct TavilySearch {
    http_client: Client,
    api_key: String,
    max_results: usize,
    endpoint: String,
}

impl std::fmt::Debug for TavilySearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilySearch")
            .field("api_key", &"[REDACTED]")
            .field("max_results", &self.max_results)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl TavilySearch {
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: http_client(Duration::from_secs(30)),
            api_key,
            max_results: 5,
            endpoint: TAVILY_API_URL.to_string(),
        }
    }

    /// Sets the number of results requested, clamped to 1..=20.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.clamp(1, 20);
        self
    }

    /// Overrides the API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn run(&self, query: &str) -> Result<String, CapabilityError> {
        let body = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
            search_depth: "basic",
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::RequestFailed {
                capability: CAPABILITY,
                message: e.to_string(),
            })?;
        let response = check_status(CAPABILITY, response).await?;

        let parsed: SearchResponse =
            response.json().await.map_err(|e| CapabilityError::UnexpectedPayload {
                capability: CAPABILITY,
                message: e.to_string(),
            })?;

        tracing::debug!(query = %query, hits = parsed.results.len(), "Web search completed");
        Ok(format_hits(&parsed.results))
    }
}

/// Flattens search hits into a prompt-ready block of text.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "Title: {}\nURL: {}\nContent: {}",
                hit.title,
                hit.url,
                hit.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hits() {
        let hits = vec![
            SearchHit {
                title: "Reef survey".to_string(),
                url: "https://reef.example".to_string(),
                content: " Bleaching rose 20% \n".to_string(),
            },
            SearchHit {
                title: "Soil study".to_string(),
                url: "https://soil.example".to_string(),
                content: String::new(),
            },
        ];
        let text = format_hits(&hits);
        assert!(text.starts_with("Title: Reef survey\nURL: https://reef.example\nContent: Bleaching rose 20%"));
        assert!(text.contains("\n\nTitle: Soil study"));
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let parsed: SearchResponse =
            serde_json::from_str(r#"{"results": [{"url": "https://a"}]}"#).expect("parse");
        assert_eq!(parsed.results[0].url, "https://a");
        assert_eq!(parsed.results[0].title, "");

        let empty: SearchResponse = serde_json::from_str("{}").expect("parse");
        assert!(empty.results.is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let search = TavilySearch::new("secret-key".to_string()).with_max_results(50);
        let debug = format!("{:?}", search);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("max_results: 20"));
    }
}
