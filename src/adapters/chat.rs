//! Chat platform adapter: Socket-Mode-style event stream, out of scope per
//! §1. Only the outbound posting surface the pipeline needs is modeled here
//! — inbound events are absorbed into the Coordination Store by the intake
//! process, itself out of scope.

use crate::error::Result;
use std::pin::Pin;

/// Static trait for chat adapters.
pub trait Chat: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Append-only post to a thread. Failures logged, not raised (§4.4).
    fn post(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Post the initial acknowledgement with a single interactive "Cancel"
    /// button whose action value is `task_id` (§6).
    fn post_with_cancel_button(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
        task_id: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn react(
        &self,
        channel: &str,
        thread_ts: &str,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism.
pub trait ChatDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn post<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn post_with_cancel_button<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        text: &'a str,
        task_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn react<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: Chat> ChatDyn for T {
    fn name(&self) -> &str {
        Chat::name(self)
    }

    fn post<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Chat::post(self, channel, thread_ts, text))
    }

    fn post_with_cancel_button<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        text: &'a str,
        task_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Chat::post_with_cancel_button(
            self, channel, thread_ts, text, task_id,
        ))
    }

    fn react<'a>(
        &'a self,
        channel: &'a str,
        thread_ts: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Chat::react(self, channel, thread_ts, emoji))
    }
}

/// A local/dev implementation that logs posts instead of hitting a real
/// chat platform. Stands in for the out-of-scope Socket-Mode adapter so the
/// pipeline is runnable and testable without network credentials.
pub struct LoggingChatAdapter;

impl Chat for LoggingChatAdapter {
    fn name(&self) -> &str {
        "logging-chat"
    }

    async fn post(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        tracing::info!(channel, thread_ts, text, "chat post");
        Ok(())
    }

    async fn post_with_cancel_button(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
        task_id: &str,
    ) -> Result<()> {
        tracing::info!(channel, thread_ts, text, task_id, "chat post with cancel button");
        Ok(())
    }
}
