//! Code-forge adapter: branch existence, PR create/edit/ready, media-branch
//! upload, invitation accept — out of scope per §1.

use crate::error::Result;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// A created pull request.
#[derive(Debug, Clone)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
}

/// A pending repository invitation for a dog's credential.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub id: u64,
    pub repo: String,
}

pub trait Forge: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn branch_exists(
        &self,
        branch: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Create a draft PR (§4.11 `init`/`planning`).
    fn create_draft_pr(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
        assignee: &str,
    ) -> impl std::future::Future<Output = Result<PrInfo>> + Send;

    fn edit_pr(
        &self,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Mark a draft PR ready via the forge's mark-ready mutation (§6).
    fn mark_ready(&self, number: u64) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Upload a file to a dedicated media branch (created from default if
    /// absent); returns a stable raw-content URL (§4.8).
    fn upload_to_media_branch(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    fn list_pending_invitations(
        &self,
        credential: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Invitation>>> + Send;

    fn accept_invitation(
        &self,
        credential: &str,
        invitation_id: u64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ForgeDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn branch_exists<'a>(
        &'a self,
        branch: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + 'a>>;

    fn create_draft_pr<'a>(
        &'a self,
        branch: &'a str,
        base: &'a str,
        title: &'a str,
        body: &'a str,
        assignee: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<PrInfo>> + Send + 'a>>;

    fn edit_pr<'a>(
        &'a self,
        number: u64,
        title: Option<&'a str>,
        body: Option<&'a str>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn mark_ready<'a>(
        &'a self,
        number: u64,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn upload_to_media_branch<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>>;

    fn list_pending_invitations<'a>(
        &'a self,
        credential: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<Invitation>>> + Send + 'a>>;

    fn accept_invitation<'a>(
        &'a self,
        credential: &'a str,
        invitation_id: u64,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: Forge> ForgeDyn for T {
    fn name(&self) -> &str {
        Forge::name(self)
    }

    fn branch_exists<'a>(
        &'a self,
        branch: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(Forge::branch_exists(self, branch))
    }

    fn create_draft_pr<'a>(
        &'a self,
        branch: &'a str,
        base: &'a str,
        title: &'a str,
        body: &'a str,
        assignee: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<PrInfo>> + Send + 'a>> {
        Box::pin(Forge::create_draft_pr(self, branch, base, title, body, assignee))
    }

    fn edit_pr<'a>(
        &'a self,
        number: u64,
        title: Option<&'a str>,
        body: Option<&'a str>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Forge::edit_pr(self, number, title, body))
    }

    fn mark_ready<'a>(
        &'a self,
        number: u64,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Forge::mark_ready(self, number))
    }

    fn upload_to_media_branch<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Forge::upload_to_media_branch(self, filename, bytes))
    }

    fn list_pending_invitations<'a>(
        &'a self,
        credential: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<Invitation>>> + Send + 'a>> {
        Box::pin(Forge::list_pending_invitations(self, credential))
    }

    fn accept_invitation<'a>(
        &'a self,
        credential: &'a str,
        invitation_id: u64,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Forge::accept_invitation(self, credential, invitation_id))
    }
}

/// A local/dev implementation that logs forge operations and hands back
/// synthetic PR numbers instead of hitting a real code-forge API. Stands in
/// for the out-of-scope forge backend so the pipeline is runnable and
/// testable without forge credentials, the same role `LoggingChatAdapter`
/// plays for chat.
pub struct LoggingForge {
    next_pr_number: AtomicU64,
}

impl LoggingForge {
    pub fn new() -> Self {
        Self {
            next_pr_number: AtomicU64::new(1),
        }
    }
}

impl Default for LoggingForge {
    fn default() -> Self {
        Self::new()
    }
}

impl Forge for LoggingForge {
    fn name(&self) -> &str {
        "logging-forge"
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        tracing::info!(branch, "forge branch_exists");
        Ok(false)
    }

    async fn create_draft_pr(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
        assignee: &str,
    ) -> Result<PrInfo> {
        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst);
        tracing::info!(branch, base, title, body, assignee, number, "forge create_draft_pr");
        Ok(PrInfo {
            number,
            url: format!("https://forge.internal/pulls/{number}"),
        })
    }

    async fn edit_pr(&self, number: u64, title: Option<&str>, body: Option<&str>) -> Result<()> {
        tracing::info!(number, ?title, ?body, "forge edit_pr");
        Ok(())
    }

    async fn mark_ready(&self, number: u64) -> Result<()> {
        tracing::info!(number, "forge mark_ready");
        Ok(())
    }

    async fn upload_to_media_branch(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        tracing::info!(filename, bytes = bytes.len(), "forge upload_to_media_branch");
        Ok(format!("https://forge.internal/media/{filename}"))
    }

    async fn list_pending_invitations(&self, credential: &str) -> Result<Vec<Invitation>> {
        let _ = credential;
        Ok(Vec::new())
    }

    async fn accept_invitation(&self, credential: &str, invitation_id: u64) -> Result<()> {
        tracing::info!(credential, invitation_id, "forge accept_invitation");
        Ok(())
    }
}
