//! Headless browser driver: given a URL, produce a PNG. Out of scope per
//! §1; a real implementation lives behind `visual_diff::ChromeBrowser`
//! (C8), which is in-scope plumbing that happens to use `chromiumoxide`.

use crate::error::Result;
use std::pin::Pin;

pub trait Browser: Send + Sync + 'static {
    /// Render `url` full-page at 1920x1080, `wait_until=networkidle`, plus a
    /// settle delay, and return the PNG bytes (§4.8).
    fn screenshot(&self, url: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

pub trait BrowserDyn: Send + Sync + 'static {
    fn screenshot<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

impl<T: Browser> BrowserDyn for T {
    fn screenshot<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(Browser::screenshot(self, url))
    }
}
