//! Thread Channel (C4): bidirectional chat I/O over the Coordination Store's
//! thread inbox and the Chat adapter's outbound surface.

use crate::adapters::ChatDyn;
use crate::error::Result;
use crate::store::CoordinationStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a message in a fixed preamble injected into the next editing-agent
/// prompt (§4.4).
pub fn for_prompt(text: &str) -> String {
    format!(
        "--- Feedback received mid-task from the thread ---\n{text}\n--- end feedback ---"
    )
}

pub struct ThreadChannel {
    channel: String,
    thread_ts: String,
    chat: Arc<dyn ChatDyn>,
    store: Arc<CoordinationStore>,
    /// Per-instance read pointer; not persisted across retries, so a retry
    /// starts at zero and re-absorbs prior feedback (§4.4).
    read_pointer: AtomicUsize,
}

impl ThreadChannel {
    pub fn new(
        channel: String,
        thread_ts: String,
        chat: Arc<dyn ChatDyn>,
        store: Arc<CoordinationStore>,
    ) -> Self {
        Self {
            channel,
            thread_ts,
            chat,
            store,
            read_pointer: AtomicUsize::new(0),
        }
    }

    /// Append-only post. Failures logged, not raised (§4.4).
    pub async fn post(&self, text: &str, emoji: Option<&str>) {
        if let Err(error) = self.chat.post(&self.channel, &self.thread_ts, text).await {
            tracing::warn!(%error, thread_ts = %self.thread_ts, "failed to post to thread");
            return;
        }
        if let Some(emoji) = emoji
            && let Err(error) = self.chat.react(&self.channel, &self.thread_ts, emoji).await
        {
            tracing::warn!(%error, thread_ts = %self.thread_ts, "failed to react to thread");
        }
    }

    /// Posts a formatted prompt. Does not itself block for a reply — pair
    /// with `wait` for that (§4.4).
    pub async fn ask(&self, question: &str) {
        self.post(&format!("❓ {question}"), None).await;
    }

    /// Read-all-since-pointer, advance the pointer, return the combined
    /// text or `None` if nothing new arrived. Non-blocking.
    pub async fn drain_new(&self) -> Result<Option<String>> {
        let total = self.store.thread_message_count(&self.thread_ts).await?;
        let start = self.read_pointer.load(Ordering::SeqCst);
        if start >= total {
            return Ok(None);
        }

        let messages = self
            .store
            .thread_messages_range(&self.thread_ts, start as isize, (total - 1) as isize)
            .await?;
        self.read_pointer.store(total, Ordering::SeqCst);

        if messages.is_empty() {
            return Ok(None);
        }

        let combined = messages
            .iter()
            .map(|m| format!("{}: {}", m.user_name, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(combined))
    }

    /// Read-all, non-destructive: returns every message posted to the
    /// thread so far without touching the read pointer, for assembling a
    /// "Thread Feedback" PR summary section (C4 read-all-for-PR-summary).
    pub async fn read_all(&self) -> Result<Vec<String>> {
        let total = self.store.thread_message_count(&self.thread_ts).await?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let messages = self
            .store
            .thread_messages_range(&self.thread_ts, 0, (total - 1) as isize)
            .await?;
        Ok(messages.into_iter().map(|m| format!("{}: {}", m.user_name, m.text)).collect())
    }

    /// Poll `drain_new` until `min` messages arrive (approximated by a
    /// non-empty drain) or `timeout` elapses; returns all collected text
    /// chunks. Default timeout 10 min, poll interval 10 s (§5).
    pub async fn wait(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        min: usize,
    ) -> Result<Vec<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut collected = Vec::new();

        loop {
            if let Some(text) = self.drain_new().await? {
                collected.push(text);
                if collected.len() >= min.max(1) {
                    return Ok(collected);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(collected);
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_prompt_wraps_with_preamble() {
        let wrapped = for_prompt("add rate limiting");
        assert!(wrapped.contains("add rate limiting"));
        assert!(wrapped.starts_with("--- Feedback"));
    }
}
