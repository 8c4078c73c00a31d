//! A web search provider and an HTML fetcher, out of scope per §1.

use crate::error::Result;
use std::pin::Pin;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub trait SearchFetch: Send + Sync + 'static {
    fn search(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Vec<SearchResult>>> + Send;

    fn fetch(&self, url: &str) -> impl std::future::Future<Output = Result<String>> + Send;
}

pub trait SearchFetchDyn: Send + Sync + 'static {
    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<SearchResult>>> + Send + 'a>>;

    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>>;
}

impl<T: SearchFetch> SearchFetchDyn for T {
    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<SearchResult>>> + Send + 'a>> {
        Box::pin(SearchFetch::search(self, query))
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(SearchFetch::fetch(self, url))
    }
}

/// A plain-`reqwest` implementation: no real search-engine key, just a
/// direct GET fetch. Stands in for the out-of-scope search provider so
/// `search_context` (§4.10) has something to call locally.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchFetch for ReqwestFetcher {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        // No search provider wired up locally; an empty result set makes
        // `search_context` fall back to its NONE path (§4.10).
        Ok(Vec::new())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let text = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("fetch {url} failed: {e}"))?
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("reading response body from {url} failed: {e}"))?;
        Ok(text)
    }
}
