//! Visual Diff (C8): URL extraction from a plan, URL validation, warm-up
//! fetches, headless screenshot, upload to a media store (§4.8).

use crate::adapters::{Browser, BrowserDyn};
use crate::error::Result;
use crate::media_store::MediaStoreDyn;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Browser as ChromiumBrowser, BrowserConfig};
use futures::StreamExt;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

const FRONTEND_EXTENSIONS: &[&str] = &[".tsx", ".jsx", ".vue", ".svelte", ".css", ".scss"];
const FRONTEND_KEYWORDS: &[&str] = &["page", "component", "ui", "frontend", "style", "layout"];

const MAX_URLS: usize = 5;
const WARMUP_TIMEOUT: Duration = Duration::from_secs(15);
const HYDRATION_SETTLE: Duration = Duration::from_secs(2);

pub fn is_frontend(plan: &str, files: Option<&[String]>) -> bool {
    if let Some(files) = files
        && files
            .iter()
            .any(|f| FRONTEND_EXTENSIONS.iter().any(|ext| f.ends_with(ext)))
    {
        return true;
    }

    let lower = plan.to_ascii_lowercase();
    FRONTEND_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn quoted_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(/[A-Za-z0-9\-_/]*)"#).unwrap())
}

fn page_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([A-Za-z][A-Za-z0-9 ]{0,30}) page\b").unwrap())
}

/// Scans quoted path-like tokens plus "X page" phrases; dedupes, sorts, and
/// ensures `/` is first if present, capped at 5 (§4.8).
pub fn extract_urls(plan: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    for capture in quoted_path_re().captures_iter(plan) {
        urls.push(capture[1].to_string());
    }

    for capture in page_phrase_re().captures_iter(plan) {
        let slug = capture[1]
            .trim()
            .to_ascii_lowercase()
            .replace(' ', "-");
        urls.push(format!("/{slug}"));
    }

    urls.sort();
    urls.dedup();

    if let Some(pos) = urls.iter().position(|u| u == "/") {
        let root = urls.remove(pos);
        urls.insert(0, root);
    } else {
        urls.insert(0, "/".to_string());
    }

    urls.truncate(MAX_URLS);
    urls
}

#[derive(Debug, Clone)]
pub struct Shot {
    pub url: String,
    pub local_path: Option<String>,
    pub remote_url: String,
}

pub struct VisualDiff {
    browser: Arc<dyn BrowserDyn>,
    media_store: Arc<dyn MediaStoreDyn>,
    http: reqwest::Client,
}

impl VisualDiff {
    pub fn new(browser: Arc<dyn BrowserDyn>, media_store: Arc<dyn MediaStoreDyn>) -> Self {
        Self {
            browser,
            media_store,
            http: reqwest::Client::new(),
        }
    }

    /// Captures `urls` against a dev server already listening on `base_url`.
    /// `prefix` namespaces uploaded filenames (e.g. `before`/`after`).
    pub async fn capture(&self, prefix: &str, base_url: &str, urls: &[String]) -> Result<Vec<Shot>> {
        let mut shots = Vec::new();

        for url in urls {
            let full_url = format!("{}{}", base_url.trim_end_matches('/'), url);

            if self.http.get(&full_url).timeout(WARMUP_TIMEOUT).send().await.is_err() {
                continue;
            }

            if !self.validate(&full_url).await {
                continue;
            }

            tokio::time::sleep(HYDRATION_SETTLE).await;

            let png = match self.browser.screenshot(&full_url).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(%error, url = %full_url, "screenshot failed");
                    continue;
                }
            };

            let slug = slugify(url);
            let filename = format!("{prefix}-{slug}.png");
            let remote_url = self.media_store.upload(&filename, png).await?;

            shots.push(Shot {
                url: url.clone(),
                local_path: None,
                remote_url,
            });
        }

        Ok(shots)
    }

    /// HEAD first, falling back to GET on a 405; skips 4xx/5xx.
    async fn validate(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED => {
                matches!(self.http.get(url).send().await, Ok(r) if r.status().is_success())
            }
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn slugify(url: &str) -> String {
    let trimmed = url.trim_matches('/');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.replace('/', "-")
    }
}

/// Renders full-page PNGs via a headless Chromium instance, launched once
/// and reused across screenshots within a capture pass (§4.8).
pub struct ChromeBrowser {
    browser: tokio::sync::Mutex<ChromiumBrowser>,
}

impl ChromeBrowser {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {e}"))?;

        let (browser, mut handler) = ChromiumBrowser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to launch headless browser: {e}"))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser: tokio::sync::Mutex::new(browser) })
    }
}

impl Browser for ChromeBrowser {
    async fn screenshot(&self, url: &str) -> Result<Vec<u8>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open page {url}: {e}"))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| anyhow::anyhow!("navigation to {url} failed: {e}"))?;

        let png = page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| anyhow::anyhow!("screenshot of {url} failed: {e}"))?;

        let _ = page.close().await;
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_frontend_detects_by_extension() {
        assert!(is_frontend("refactor the button", Some(&["src/Button.tsx".to_string()])));
    }

    #[test]
    fn is_frontend_detects_by_keyword() {
        assert!(is_frontend("update the settings page layout", None));
    }

    #[test]
    fn is_frontend_false_for_backend_only_plan() {
        assert!(!is_frontend("add a retry to the worker queue", None));
    }

    #[test]
    fn extract_urls_ensures_root_first_and_dedupes() {
        let plan = r#"Update "/settings" and the Settings page, also revisit "/settings" again."#;
        let urls = extract_urls(plan);
        assert_eq!(urls[0], "/");
        assert!(urls.contains(&"/settings".to_string()));
        let settings_count = urls.iter().filter(|u| *u == "/settings").count();
        assert_eq!(settings_count, 1);
    }

    #[test]
    fn extract_urls_caps_at_five() {
        let plan = r#""/a" "/b" "/c" "/d" "/e" "/f" "/g""#;
        let urls = extract_urls(plan);
        assert_eq!(urls.len(), MAX_URLS);
    }

    #[test]
    fn slugify_root_path() {
        assert_eq!(slugify("/"), "root");
        assert_eq!(slugify("/settings/billing"), "settings-billing");
    }
}
