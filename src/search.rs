use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::{AssistantError, Result};
use crate::models::{EvidenceItem, Topic};
use crate::retry::RetryPolicy;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

pub const DEFAULT_MAX_RESULTS: u32 = 3;

/// Raw search hit as the remote API reports it, before shaping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Web-search endpoint seam. One request per call; retry and rate
/// limiting live in `SearchProvider`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: u32,
        topic: Topic,
        recency_days: Option<u32>,
    ) -> Result<Vec<RawSearchResult>>;
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    topic: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<RawSearchResult>,
}

pub struct TavilyClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TavilyClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: TAVILY_API_URL.to_string(),
        }
    }
}

#[async_trait]
impl SearchApi for TavilyClient {
    async fn search(
        &self,
        query: &str,
        max_results: u32,
        topic: Topic,
        recency_days: Option<u32>,
    ) -> Result<Vec<RawSearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results,
            topic: topic.as_str(),
            // Tavily only honors a day window for news-scoped searches.
            days: match topic {
                Topic::News => recency_days,
                Topic::General => None,
            },
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: TavilyResponse = response.json().await?;
        Ok(body.results)
    }
}

/// Minimum-interval gate over the search API: a token bucket of one.
/// The mutex serializes concurrent callers so the interval holds even
/// across sessions sharing the process.
pub struct RateGate {
    min_interval: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// Sleep off any deficit against the minimum interval, then claim
    /// the current instant. The lock is held across the sleep on purpose.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let deficit = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", deficit);
                sleep(deficit).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Search layer as the orchestrator sees it: rate-limited, retried, and
/// shaped. Never fails: a search outage degrades to an empty evidence
/// list rather than aborting the conversation.
pub struct SearchProvider {
    api: Arc<dyn SearchApi>,
    gate: RateGate,
    retry: RetryPolicy,
}

impl SearchProvider {
    pub fn new(api: Arc<dyn SearchApi>, gate: RateGate, retry: RetryPolicy) -> Self {
        Self { api, gate, retry }
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: u32,
        topic: Topic,
        recency_days: Option<u32>,
    ) -> Vec<EvidenceItem> {
        if query.trim().is_empty() {
            tracing::warn!("Empty search query provided, skipping web search");
            return Vec::new();
        }

        self.gate.wait().await;

        tracing::info!("Performing {} search for query: {}", topic.as_str(), query);
        let raw = self
            .retry
            .run(|| self.api.search(query, max_results, topic, recency_days))
            .await;

        match raw {
            Ok(results) => {
                let shaped = shape_results(results, max_results as usize);
                tracing::info!("Retrieved {} usable search results", shaped.len());
                shaped
            }
            Err(e) => {
                tracing::warn!("Web search failed after retries, continuing without evidence: {e}");
                Vec::new()
            }
        }
    }
}

/// Drop incomplete hits and cap the list.
fn shape_results(results: Vec<RawSearchResult>, max_results: usize) -> Vec<EvidenceItem> {
    results
        .into_iter()
        .filter_map(|r| {
            let title = r.title.trim();
            let url = r.url.trim();
            let excerpt = r.content.trim();
            if title.is_empty() || url.is_empty() || excerpt.is_empty() {
                return None;
            }
            Some(EvidenceItem {
                title: title.to_string(),
                url: url.to_string(),
                excerpt: excerpt.to_string(),
            })
        })
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    fn test_retry() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(1),
            },
        )
    }

    fn raw(title: &str, url: &str, content: &str) -> RawSearchResult {
        RawSearchResult {
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_blank_query_skips_network_call() {
        let mut api = MockSearchApi::new();
        api.expect_search().times(0);

        let provider = SearchProvider::new(
            Arc::new(api),
            RateGate::new(Duration::ZERO),
            test_retry(),
        );
        let results = provider
            .search("   \t ", DEFAULT_MAX_RESULTS, Topic::General, None)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_results_are_shaped_and_truncated() {
        let mut api = MockSearchApi::new();
        api.expect_search().times(1).returning(|_, _, _, _| {
            Ok(vec![
                raw("A", "http://a", "alpha"),
                raw("", "http://missing-title", "beta"),
                raw("C", "http://c", "   "),
                raw("D", "http://d", "delta"),
                raw("E", "http://e", "epsilon"),
                raw("F", "http://f", "zeta"),
            ])
        });

        let provider = SearchProvider::new(
            Arc::new(api),
            RateGate::new(Duration::ZERO),
            test_retry(),
        );
        let results = provider.search("rust", 3, Topic::General, None).await;
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a", "http://d", "http://e"]);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_degrades_to_empty_list() {
        let mut api = MockSearchApi::new();
        api.expect_search().times(3).returning(|_, _, _, _| {
            Err(AssistantError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        });

        let provider = SearchProvider::new(
            Arc::new(api),
            RateGate::new(Duration::ZERO),
            test_retry(),
        );
        let results = provider
            .search("rust", DEFAULT_MAX_RESULTS, Topic::News, Some(3))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_rate_gate_enforces_minimum_interval() {
        let gate = RateGate::new(Duration::from_millis(50));
        let started = Instant::now();
        gate.wait().await;
        gate.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_rate_gate_first_call_does_not_wait() {
        let gate = RateGate::new(Duration::from_secs(5));
        let started = Instant::now();
        gate.wait().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
