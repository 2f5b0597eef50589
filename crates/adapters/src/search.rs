use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ebook_core::{ResearchError, ResearchSource};

use crate::error::AdapterError;

pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Google results through serper.dev, used to ground outlines.
pub struct SerperSearch {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>, timeout: u64) -> Result<Self, AdapterError> {
        Self::with_endpoint(SERPER_ENDPOINT, api_key, timeout)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AdapterError::invalid_config("SERPER_API_KEY must not be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub async fn snippets(&self, query: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        debug!("serper search: {query:?} (limit {limit})");
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&SearchRequest { q: query, num: limit })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .organic
            .into_iter()
            .filter_map(OrganicResult::into_snippet)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl ResearchSource for SerperSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, ResearchError> {
        self.snippets(query, limit).await.map_err(ResearchError::new)
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl OrganicResult {
    fn into_snippet(self) -> Option<String> {
        let title = self.title.trim();
        let snippet = self.snippet.trim();
        match (title.is_empty(), snippet.is_empty()) {
            (true, true) => None,
            (false, true) => Some(title.to_string()),
            (true, false) => Some(snippet.to_string()),
            (false, false) => Some(format!("{title}: {snippet}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    #[test]
    fn requires_an_api_key() {
        assert!(matches!(
            SerperSearch::new("  ", 5),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn posts_query_and_reads_organic_results() {
        let (base, server) = serve_once(
            200,
            r#"{"organic":[
                {"title":"Python","snippet":"A readable language"},
                {"title":"","snippet":""},
                {"title":"PEP 8"}
            ]}"#,
        )
        .await;
        let search = SerperSearch::with_endpoint(format!("{base}/search"), "key-1", 5).unwrap();

        let snippets = search.search("python iniciantes", 5).await.unwrap();
        assert_eq!(snippets, ["Python: A readable language", "PEP 8"]);

        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("POST /search"));
        assert_eq!(captured.header("x-api-key"), Some("key-1"));
        let body = captured.json();
        assert_eq!(body["q"], "python iniciantes");
        assert_eq!(body["num"], 5);
    }

    #[tokio::test]
    async fn failures_surface_as_research_errors() {
        let (base, _server) = serve_once(403, r#"{"message":"bad key"}"#).await;
        let search = SerperSearch::with_endpoint(base, "key-1", 5).unwrap();

        let err = search.search("python", 3).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
