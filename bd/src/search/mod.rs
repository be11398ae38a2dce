//! Pluggable web search backends
//!
//! Resolved from `SEARCH_BACKEND` plus the matching API key env var.
//! Absence of a backend is not an error: agents fall back to model-only
//! answers, and errors land in the response rather than propagating.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// web, news, docs, forum
    pub source_type: String,
    pub relevance: f64,
}

/// Aggregated search response
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub backend: String,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn success(&self) -> bool {
        self.error.is_none() && !self.results.is_empty()
    }

    fn failed(query: &str, backend: &str, error: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            backend: backend.to_string(),
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The configured search backend
pub enum WebSearch {
    Brave { api_key: String },
    Tavily { api_key: String },
    SerpApi { api_key: String },
    None,
}

impl WebSearch {
    /// Resolve from SEARCH_BACKEND and the per-backend key env vars.
    /// Unset or unusable configuration degrades to None.
    pub fn from_env() -> Self {
        let backend = std::env::var("SEARCH_BACKEND").unwrap_or_default();
        let key = |var: &str| std::env::var(var).ok().filter(|k| !k.is_empty());

        match backend.as_str() {
            "brave" => key("BRAVE_API_KEY").map(|api_key| WebSearch::Brave { api_key }),
            "tavily" => key("TAVILY_API_KEY").map(|api_key| WebSearch::Tavily { api_key }),
            "serpapi" => key("SERPAPI_API_KEY").map(|api_key| WebSearch::SerpApi { api_key }),
            _ => None,
        }
        .unwrap_or(WebSearch::None)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            WebSearch::Brave { .. } => "brave",
            WebSearch::Tavily { .. } => "tavily",
            WebSearch::SerpApi { .. } => "serpapi",
            WebSearch::None => "none",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, WebSearch::None)
    }

    pub async fn search(&self, query: &str, max_results: usize) -> SearchResponse {
        let outcome = match self {
            WebSearch::Brave { api_key } => self.search_brave(api_key, query, max_results).await,
            WebSearch::Tavily { api_key } => self.search_tavily(api_key, query, max_results).await,
            WebSearch::SerpApi { api_key } => self.search_serpapi(api_key, query, max_results).await,
            WebSearch::None => {
                return SearchResponse {
                    query: query.to_string(),
                    backend: "none".to_string(),
                    ..Default::default()
                };
            }
        };

        outcome.unwrap_or_else(|e| {
            warn!(backend = self.backend_name(), error = %e, "Web search failed");
            SearchResponse::failed(query, self.backend_name(), e)
        })
    }

    fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default()
    }

    async fn search_brave(&self, api_key: &str, query: &str, max_results: usize) -> Result<SearchResponse, String> {
        let response = Self::http()
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", &max_results.min(20).to_string())])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let data: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let results = data["web"]["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .map(|item| {
                        let url = item["url"].as_str().unwrap_or("").to_string();
                        SearchResult {
                            title: item["title"].as_str().unwrap_or("").to_string(),
                            snippet: item["description"].as_str().unwrap_or("").to_string(),
                            source_type: classify_source(&url),
                            relevance: 0.5,
                            url,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            backend: "brave".to_string(),
            error: None,
        })
    }

    async fn search_tavily(&self, api_key: &str, query: &str, max_results: usize) -> Result<SearchResponse, String> {
        let response = Self::http()
            .post("https://api.tavily.com/search")
            .json(&serde_json::json!({
                "api_key": api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let data: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let results = data["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .map(|item| {
                        let url = item["url"].as_str().unwrap_or("").to_string();
                        SearchResult {
                            title: item["title"].as_str().unwrap_or("").to_string(),
                            snippet: item["content"].as_str().unwrap_or("").to_string(),
                            source_type: classify_source(&url),
                            relevance: item["score"].as_f64().unwrap_or(0.5),
                            url,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            backend: "tavily".to_string(),
            error: None,
        })
    }

    async fn search_serpapi(&self, api_key: &str, query: &str, max_results: usize) -> Result<SearchResponse, String> {
        let response = Self::http()
            .get("https://serpapi.com/search")
            .query(&[("q", query), ("api_key", api_key), ("engine", "google")])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let data: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let results = data["organic_results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .map(|item| {
                        let url = item["link"].as_str().unwrap_or("").to_string();
                        SearchResult {
                            title: item["title"].as_str().unwrap_or("").to_string(),
                            snippet: item["snippet"].as_str().unwrap_or("").to_string(),
                            source_type: classify_source(&url),
                            relevance: 0.5,
                            url,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            backend: "serpapi".to_string(),
            error: None,
        })
    }
}

fn classify_source(url: &str) -> String {
    let lower = url.to_lowercase();
    let kind = if lower.contains("docs.") || lower.contains("/docs") || lower.contains("documentation") {
        "docs"
    } else if lower.contains("reddit.com") || lower.contains("stackoverflow.com") || lower.contains("news.ycombinator") {
        "forum"
    } else if lower.contains("/news") || lower.contains("news.") {
        "news"
    } else {
        "web"
    };
    kind.to_string()
}
