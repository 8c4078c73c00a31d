//! Pipeline (C11): the phase state machine binding C1–C10, enforcing
//! cancellation checkpoints between every adjacent pair of phases (§4.11).

use crate::adapters::{ChatDyn, ForgeDyn, SearchFetchDyn};
use crate::agent::AgentFacade;
use crate::cancellation::CancellationManager;
use crate::config::Config;
use crate::dog::{Dog, DogSelector};
use crate::error::{PipelineError, Result};
use crate::media_store::MediaStoreDyn;
use crate::store::CoordinationStore;
use crate::thread_channel::{self, ThreadChannel};
use crate::visual_diff::{Shot, VisualDiff};
use crate::workspace::RepoWorkspace;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

const MAX_FETCHED_URLS: usize = 3;
const MAX_FETCHED_CHARS: usize = 2000;

fn web_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<>\)\]\"']+").unwrap())
}

fn extract_web_urls(description: &str) -> Vec<String> {
    web_url_re()
        .find_iter(description)
        .map(|m| m.as_str().to_string())
        .take(MAX_FETCHED_URLS)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Planning,
    Implementation,
    SelfReview,
    Testing,
    Finalization,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Planning => "planning",
            Phase::Implementation => "implementation",
            Phase::SelfReview => "self_review",
            Phase::Testing => "testing",
            Phase::Finalization => "finalization",
        }
    }

    const ORDER: [Phase; 6] = [
        Phase::Init,
        Phase::Planning,
        Phase::Implementation,
        Phase::SelfReview,
        Phase::Testing,
        Phase::Finalization,
    ];
}

/// Queued job input (§3 Task Payload). The branch name is not supplied
/// here — it is generated during `init` from the selected dog, so it
/// reflects dog assignment and forge conflict resolution (§6).
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub task_id: String,
    pub description: String,
    pub channel: String,
    pub thread_ts: String,
    pub requester_name: String,
    pub requester_url: String,
    pub start_time: DateTime<Utc>,
    pub images: Vec<StagedImage>,
}

#[derive(Debug, Clone)]
pub struct StagedImage {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// One phase's result: either proceed to the next phase, or a cancellation
/// was observed and the pipeline must jump straight to annotated shutdown.
/// A tagged result rather than raised exceptions, per the Design Notes in
/// §9.
enum Outcome {
    Proceed,
    Cancelled(crate::store::CancelInfo),
}

pub struct PipelineOutcome {
    pub task_id: String,
    pub status: FinalStatus,
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Done,
    Cancelled,
    Failed,
}

struct PhaseState {
    phase: Phase,
    branch_name: String,
    plan: String,
    pr_number: Option<u64>,
    pr_url: Option<String>,
    image_urls: Vec<String>,
    web_context: Option<String>,
    search_context: Option<String>,
    /// Feedback drained at the end of `planning`, carried forward to be
    /// absorbed by `implementation`'s first `implement` call (§4.11).
    pending_feedback: Option<String>,
    /// Every feedback chunk actually absorbed into a re-implementation
    /// call, in order, for the final PR body's "Thread Feedback" section
    /// (spec.md:253 seed scenario 6).
    feedback_log: Vec<String>,
    before_screenshots: Vec<Shot>,
    after_screenshots: Vec<Shot>,
}

impl PhaseState {
    fn new() -> Self {
        Self {
            phase: Phase::Init,
            branch_name: String::new(),
            plan: String::new(),
            pr_number: None,
            pr_url: None,
            image_urls: Vec::new(),
            web_context: None,
            search_context: None,
            pending_feedback: None,
            feedback_log: Vec::new(),
            before_screenshots: Vec::new(),
            after_screenshots: Vec::new(),
        }
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<CoordinationStore>,
    cancellation: CancellationManager,
    selector: Arc<DogSelector>,
    chat: Arc<dyn ChatDyn>,
    forge: Arc<dyn ForgeDyn>,
    media_store: Arc<dyn MediaStoreDyn>,
    search: Arc<dyn SearchFetchDyn>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CoordinationStore>,
        selector: Arc<DogSelector>,
        chat: Arc<dyn ChatDyn>,
        forge: Arc<dyn ForgeDyn>,
        media_store: Arc<dyn MediaStoreDyn>,
        search: Arc<dyn SearchFetchDyn>,
    ) -> Self {
        let cancellation = CancellationManager::new(store.clone());
        Self {
            config,
            store,
            cancellation,
            selector,
            chat,
            forge,
            media_store,
            search,
        }
    }

    pub async fn run(&self, payload: TaskPayload) -> Result<PipelineOutcome> {
        let dog = self.selector.select().await?;
        let working_root = self.config.workspace_root.join(&payload.task_id);
        let workspace = Arc::new(RepoWorkspace::new(working_root.clone()));
        let thread = Arc::new(ThreadChannel::new(
            payload.channel.clone(),
            payload.thread_ts.clone(),
            self.chat.clone(),
            self.store.clone(),
        ));

        let result = self.run_phases(&payload, &dog, workspace.clone(), thread.clone()).await;

        self.selector.mark_free(&dog, &payload.task_id).await.ok();
        let _ = tokio::fs::remove_dir_all(&working_root).await;

        result
    }

    async fn run_phases(
        &self,
        payload: &TaskPayload,
        dog: &Dog,
        workspace: Arc<RepoWorkspace>,
        thread: Arc<ThreadChannel>,
    ) -> Result<PipelineOutcome> {
        let mut state = PhaseState::new();

        for &phase in &Phase::ORDER {
            match self.checkpoint(&payload.task_id).await {
                Outcome::Cancelled(info) => {
                    return self.finalize_cancelled(payload, dog, &workspace, &thread, &state, info).await;
                }
                Outcome::Proceed => {}
            }

            state.phase = phase;
            tracing::info!(task_id = %payload.task_id, dog = %dog.name, phase = phase.name(), "entering phase");

            let step = match phase {
                Phase::Init => self.run_init(payload, dog, &workspace, &mut state).await,
                Phase::Planning => self.run_planning(payload, &workspace, &thread, &mut state).await,
                Phase::Implementation => {
                    self.run_implementation(payload, &workspace, &thread, &mut state).await
                }
                Phase::SelfReview => self.run_self_review(payload, &workspace, &thread, &mut state).await,
                Phase::Testing => self.run_testing(payload, &workspace, &thread, &mut state).await,
                Phase::Finalization => {
                    return self.run_finalization(payload, &workspace, &thread, &mut state).await;
                }
            };

            if let Err(error) = step {
                return self.finalize_failed(payload, &thread, &state, error).await;
            }
        }

        unreachable!("finalization always returns")
    }

    async fn checkpoint(&self, task_id: &str) -> Outcome {
        if self.cancellation.is_cancelled(task_id).await {
            match self.cancellation.info(task_id).await {
                Ok(Some(info)) => return Outcome::Cancelled(info),
                _ => {
                    return Outcome::Cancelled(crate::store::CancelInfo {
                        cancelled_by: "unknown".into(),
                        cancelled_by_id: "unknown".into(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        Outcome::Proceed
    }

    async fn run_init(
        &self,
        payload: &TaskPayload,
        dog: &Dog,
        workspace: &RepoWorkspace,
        state: &mut PhaseState,
    ) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let base_branch_name = crate::dog::branch_base_name(dog, &date, &payload.description);
        state.branch_name = self.resolve_branch_name(base_branch_name).await?;

        let url = format!("https://forge.internal/{}", self.config.forge_repo);
        workspace.clone(&url, &dog.credential).await?;
        workspace.branch(&state.branch_name, &self.config.base_branch).await?;

        if !payload.images.is_empty() {
            let dir = workspace.root().join(".images");
            tokio::fs::create_dir_all(&dir).await?;
            for image in &payload.images {
                tokio::fs::write(dir.join(&image.filename), &image.bytes).await?;
                match self.media_store.upload(&image.filename, image.bytes.clone()).await {
                    Ok(media_url) => state.image_urls.push(media_url),
                    Err(error) => tracing::warn!(task_id = %payload.task_id, filename = %image.filename, %error, "image upload failed"),
                }
            }
            workspace.commit("chore: stage task images").await?;
        }

        state.web_context = self.fetch_web_context(&payload.description).await;

        workspace.push(&state.branch_name).await?;
        self.store
            .bind_thread(&payload.thread_ts, &payload.task_id, 6 * 3600)
            .await?;
        self.selector.mark_busy(dog, &payload.task_id).await?;
        Ok(())
    }

    /// Appends `-2`, `-3`, … to `base` until the forge reports no existing
    /// branch by that name (§6, §8 round-trip property: monotonic suffix).
    async fn resolve_branch_name(&self, base: String) -> Result<String> {
        if !self.forge.branch_exists(&base).await.unwrap_or(false) {
            return Ok(base);
        }
        let mut suffix = 2u32;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !self.forge.branch_exists(&candidate).await.unwrap_or(false) {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// Fetches any URLs named directly in the task description, distinct
    /// from the agent-judgment-driven search check in planning (§4.10).
    async fn fetch_web_context(&self, description: &str) -> Option<String> {
        let urls = extract_web_urls(description);
        if urls.is_empty() {
            return None;
        }

        let mut context = String::new();
        for url in urls {
            match self.search.fetch(&url).await {
                Ok(body) => {
                    let excerpt: String = body.chars().take(MAX_FETCHED_CHARS).collect();
                    context.push_str(&format!("- {url}\n  {excerpt}\n"));
                }
                Err(error) => tracing::warn!(%url, %error, "web context fetch failed"),
            }
        }
        if context.is_empty() { None } else { Some(context) }
    }

    async fn run_planning(
        &self,
        payload: &TaskPayload,
        workspace: &Arc<RepoWorkspace>,
        thread: &ThreadChannel,
        state: &mut PhaseState,
    ) -> Result<()> {
        let facade = self.facade(workspace.clone());
        let plan = facade.plan(&payload.description).await?;
        let title = facade.title(&payload.description, 70).await?;
        let body = facade.draft_body(&plan).await?;
        state.search_context = facade.search_context(&payload.description).await.unwrap_or(None);

        let pr = self
            .forge
            .create_draft_pr(&state.branch_name, &self.config.base_branch, &title, &body, "")
            .await?;
        state.pr_number = Some(pr.number);
        state.pr_url = Some(pr.url);
        state.plan = plan.clone();

        let preview: String = plan.chars().take(350).collect();
        thread.post(&format!("📝 Plan:\n{preview}"), None).await;

        let urls = AgentFacade::detect_urls(&plan);
        if AgentFacade::is_frontend_change(&plan, &[])
            && let Ok(browser) = crate::visual_diff::ChromeBrowser::launch().await
        {
            let visual_diff = VisualDiff::new(Arc::new(browser), self.media_store.clone());
            state.before_screenshots = facade
                .capture_before(&["npm", "run", "dev"], &urls, &visual_diff)
                .await
                .unwrap_or_default();
        }

        if let Some(feedback) = thread.drain_new().await.ok().flatten() {
            state.feedback_log.push(feedback.clone());
            state.pending_feedback = Some(feedback);
        }
        Ok(())
    }

    async fn run_implementation(
        &self,
        payload: &TaskPayload,
        workspace: &Arc<RepoWorkspace>,
        thread: &ThreadChannel,
        state: &mut PhaseState,
    ) -> Result<()> {
        let facade = self.facade(workspace.clone());
        let feedback = state.pending_feedback.take().map(|t| thread_channel::for_prompt(&t));

        facade
            .implement(
                &payload.description,
                &state.image_urls,
                state.web_context.as_deref(),
                state.search_context.as_deref(),
                feedback.as_deref(),
                false,
            )
            .await?;

        if let Some(feedback) = thread.drain_new().await.ok().flatten() {
            state.feedback_log.push(feedback.clone());
            facade
                .implement(
                    &payload.description,
                    &state.image_urls,
                    state.web_context.as_deref(),
                    state.search_context.as_deref(),
                    Some(&thread_channel::for_prompt(&feedback)),
                    true,
                )
                .await?;
        }
        Ok(())
    }

    async fn run_self_review(
        &self,
        payload: &TaskPayload,
        workspace: &Arc<RepoWorkspace>,
        thread: &ThreadChannel,
        state: &mut PhaseState,
    ) -> Result<()> {
        let facade = self.facade(workspace.clone());
        facade.self_review().await?;

        if let Some(feedback) = thread.drain_new().await.ok().flatten() {
            state.feedback_log.push(feedback.clone());
            facade
                .implement(
                    &payload.description,
                    &[],
                    None,
                    None,
                    Some(&thread_channel::for_prompt(&feedback)),
                    true,
                )
                .await?;
        }
        Ok(())
    }

    async fn run_testing(
        &self,
        payload: &TaskPayload,
        workspace: &Arc<RepoWorkspace>,
        thread: &ThreadChannel,
        state: &mut PhaseState,
    ) -> Result<()> {
        let facade = self.facade(workspace.clone());
        let outcome = facade.tests().await?;
        if !outcome.passed {
            let feedback = thread.drain_new().await.ok().flatten();
            if let Some(feedback) = feedback {
                state.feedback_log.push(feedback.clone());
                facade
                    .implement(
                        "address test failures",
                        &[],
                        None,
                        None,
                        Some(&thread_channel::for_prompt(&feedback)),
                        true,
                    )
                    .await?;
                let retry = facade.tests().await?;
                if !retry.passed {
                    return Err(crate::error::AgentError::TestsFailed(retry.output).into());
                }
            } else {
                return Err(crate::error::AgentError::TestsFailed(outcome.output).into());
            }
        }
        Ok(())
    }

    async fn run_finalization(
        &self,
        payload: &TaskPayload,
        workspace: &Arc<RepoWorkspace>,
        thread: &ThreadChannel,
        state: &mut PhaseState,
    ) -> Result<PipelineOutcome> {
        workspace.remove_placeholder().await?;
        workspace.push(&state.branch_name).await?;

        let facade = self.facade(workspace.clone());

        if AgentFacade::is_frontend_change(&state.plan, &[])
            && let Ok(browser) = crate::visual_diff::ChromeBrowser::launch().await
        {
            let urls = AgentFacade::detect_urls(&state.plan);
            let visual_diff = VisualDiff::new(Arc::new(browser), self.media_store.clone());
            state.after_screenshots = facade
                .capture_after(&["npm", "run", "dev"], &urls, &visual_diff)
                .await
                .unwrap_or_default();
        }

        let duration = Utc::now().signed_duration_since(payload.start_time);
        let review_notes = format!("Elapsed: {}s", duration.num_seconds());
        let review_bullets = facade.critical_review(&state.plan).await.unwrap_or_default();
        let mut final_body = facade.final_body(&state.plan, &review_notes, &review_bullets).await?;

        let thread_feedback = thread.read_all().await.unwrap_or_default();
        if !thread_feedback.is_empty() {
            final_body.push_str("\n\n## Thread Feedback\n");
            for entry in &thread_feedback {
                final_body.push_str(&format!("- {entry}\n"));
            }
        }

        if let Some(number) = state.pr_number {
            self.forge.edit_pr(number, None, Some(&final_body)).await?;
            self.forge.mark_ready(number).await?;
        }

        thread.post("✅ Task complete.", Some("white_check_mark")).await;

        Ok(PipelineOutcome {
            task_id: payload.task_id.clone(),
            status: FinalStatus::Done,
            pr_url: state.pr_url.clone(),
        })
    }

    async fn finalize_cancelled(
        &self,
        payload: &TaskPayload,
        _dog: &Dog,
        _workspace: &RepoWorkspace,
        thread: &ThreadChannel,
        state: &PhaseState,
        info: crate::store::CancelInfo,
    ) -> Result<PipelineOutcome> {
        let completed: Vec<&str> = Phase::ORDER
            .iter()
            .take_while(|&&p| p != state.phase)
            .map(|p| p.name())
            .collect();
        let remaining: Vec<&str> = Phase::ORDER
            .iter()
            .skip_while(|&&p| p != state.phase)
            .map(|p| p.name())
            .collect();
        let duration = Utc::now().signed_duration_since(payload.start_time);

        if let Some(number) = state.pr_number {
            let annotation = format!(
                "**Cancelled by {}**\n\nCompleted phases: {}\nRemaining phases: {}\nElapsed: {}s",
                info.cancelled_by,
                completed.join(", "),
                remaining.join(", "),
                duration.num_seconds()
            );
            self.forge.edit_pr(number, None, Some(&annotation)).await.ok();
        }

        thread.post("🛑 Task cancelled.", None).await;
        self.cancellation.clear(&payload.task_id).await.ok();

        Ok(PipelineOutcome {
            task_id: payload.task_id.clone(),
            status: FinalStatus::Cancelled,
            pr_url: state.pr_url.clone(),
        })
    }

    /// Annotates the draft PR (if one was opened) with the terminal failure
    /// before propagating the error, so no PR is left silently stuck in
    /// draft. The original error is preserved so the Job Runtime can still
    /// classify it via `Error::is_transient` for retry.
    async fn finalize_failed(
        &self,
        payload: &TaskPayload,
        thread: &ThreadChannel,
        state: &PhaseState,
        error: crate::error::Error,
    ) -> Result<PipelineOutcome> {
        let phase = state.phase.name().to_string();
        let failure = PipelineError::TerminalFailure { phase: phase.clone(), reason: error.to_string() };
        tracing::error!(task_id = %payload.task_id, %failure, "phase failed");

        if let Some(number) = state.pr_number {
            let annotation = format!("**Failed in phase `{phase}`**\n\n```\n{error}\n```");
            self.forge.edit_pr(number, None, Some(&annotation)).await.ok();
        }

        thread.post(&format!("❌ Task failed in `{phase}`:\n{error}"), Some("x")).await;

        Err(error)
    }

    fn facade(&self, workspace: Arc<RepoWorkspace>) -> AgentFacade {
        AgentFacade::new(
            crate::agent::acp::AgentSubprocess::new("acp-agent", Vec::new()),
            workspace,
            Some(self.search.clone()),
            "claude-sonnet-4-20250514".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_init_through_finalization() {
        assert_eq!(Phase::ORDER[0], Phase::Init);
        assert_eq!(Phase::ORDER[5], Phase::Finalization);
    }

    #[test]
    fn phase_names_are_lowercase_snake_case() {
        assert_eq!(Phase::SelfReview.name(), "self_review");
    }
}
