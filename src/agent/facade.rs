//! Agent Façade (C10): the high-level operations the Pipeline calls,
//! wrapping the subprocess-driven editing agent, the Validation Gate, the
//! Dev-Server Controller, and Visual Diff (§4.10).

use crate::adapters::SearchFetchDyn;
use crate::agent::acp::AgentSubprocess;
use crate::cost::{Category, CostLedger};
use crate::devserver::{self, StartOutcome};
use crate::error::{AgentError, Result};
use crate::validation::{self, ValidationOutcome};
use crate::visual_diff::{self, Shot, VisualDiff};
use crate::workspace::RepoWorkspace;
use std::sync::Arc;
use std::sync::Mutex;

const COMMIT_STRATEGY_PREAMBLE: &str = "\
Commit your work in logical units of no more than 500 lines of change each, \
except where a single file's coherent edit genuinely exceeds that (e.g. a \
generated lockfile or a large data fixture) — in that case the single file \
is an acceptable exception, but do not bundle unrelated files into it.";

/// Truncates `text` to at most `max_len` characters, preferring to cut at
/// the last word boundary at or before the limit so a title never ends
/// mid-word (§6/§8).
fn truncate_at_word_boundary(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let truncated: String = text.chars().take(max_len.saturating_sub(1)).collect();
    let cut = match truncated.rfind(' ') {
        Some(idx) if idx > 0 => &truncated[..idx],
        _ => &truncated,
    };
    format!("{cut}…")
}

pub struct AgentFacade {
    agent: AgentSubprocess,
    workspace: Arc<RepoWorkspace>,
    search: Option<Arc<dyn SearchFetchDyn>>,
    ledger: Mutex<CostLedger>,
    model: String,
}

pub struct TestsOutcome {
    pub passed: bool,
    pub output: String,
}

impl AgentFacade {
    pub fn new(
        agent: AgentSubprocess,
        workspace: Arc<RepoWorkspace>,
        search: Option<Arc<dyn SearchFetchDyn>>,
        model: String,
    ) -> Self {
        Self {
            agent,
            workspace,
            search,
            ledger: Mutex::new(CostLedger::new()),
            model,
        }
    }

    pub fn cost_report(&self) -> crate::cost::Report {
        self.ledger.lock().unwrap().report()
    }

    fn record(&self, category: Category, prompt: &str, response: &str) {
        // Token counts are approximated from text length since the agent
        // speaks a message-based protocol, not a token-accounted API.
        let in_tokens = (prompt.len() / 4) as u64;
        let out_tokens = (response.len() / 4) as u64;
        self.ledger.lock().unwrap().add(category, in_tokens, out_tokens, &self.model);
    }

    async fn prompt(&self, category: Category, prompt: &str) -> Result<String> {
        let response = self.agent.prompt(self.workspace.root(), prompt).await?;
        self.record(category, prompt, &response);
        Ok(response)
    }

    /// Builds the full `"[Walker] {title}"` string, then truncates at a word
    /// boundary so the result (prefix included) never exceeds `max_len`
    /// characters (§6).
    pub async fn title(&self, description: &str, max_len: usize) -> Result<String> {
        let prompt = format!(
            "Write a single-line pull request title, at most {max_len} characters, for this task:\n{description}"
        );
        let raw = self.prompt(Category::Title, &prompt).await?;
        let prefixed = format!("[Walker] {}", raw.trim());
        Ok(truncate_at_word_boundary(&prefixed, max_len))
    }

    pub async fn plan(&self, description: &str) -> Result<String> {
        let prompt = format!(
            "Produce an implementation plan for this task. Be concrete about files and \
             approach, do not write code yet:\n{description}"
        );
        self.prompt(Category::Plan, &prompt).await
    }

    pub async fn draft_body(&self, plan: &str) -> Result<String> {
        let prompt = format!("Write a draft pull request description summarizing this plan:\n{plan}");
        self.prompt(Category::PrBody, &prompt).await
    }

    pub async fn final_body(&self, plan: &str, review_notes: &str, review_bullets: &str) -> Result<String> {
        let prompt = format!(
            "Write the final pull request description. Plan:\n{plan}\n\nReview notes:\n{review_notes}\n\n\
             Critical review:\n{review_bullets}"
        );
        self.prompt(Category::PrBody, &prompt).await
    }

    /// Asks the agent for a short critical-review bullet list before the
    /// final PR body is composed (§4.11 finalization row).
    pub async fn critical_review(&self, plan: &str) -> Result<String> {
        let prompt = format!(
            "Give a short bullet list (3-6 bullets) critically reviewing the implementation \
             against its plan. Call out real risks or gaps, not generic praise.\n\nPlan:\n{plan}"
        );
        self.prompt(Category::SelfReview, &prompt).await
    }

    /// Invokes the editing agent, enforces the no-change policy, and runs
    /// the implementation's validate/repair-once cycle (§4.10).
    pub async fn implement(
        &self,
        description: &str,
        images: &[String],
        web_context: Option<&str>,
        search_context: Option<&str>,
        feedback: Option<&str>,
        allow_no_changes: bool,
    ) -> Result<()> {
        let mut prompt = format!("{COMMIT_STRATEGY_PREAMBLE}\n\nTask:\n{description}");
        if !images.is_empty() {
            prompt.push_str(&format!("\n\nReference images:\n{}", images.join("\n")));
        }
        if let Some(web) = web_context {
            prompt.push_str(&format!("\n\nWeb context:\n{web}"));
        }
        if let Some(search) = search_context {
            prompt.push_str(&format!("\n\nSearch context:\n{search}"));
        }
        if let Some(feedback) = feedback {
            prompt.push_str(&format!("\n\n{feedback}"));
        }

        self.prompt(Category::Implement, &prompt).await?;

        let changed = self.workspace.changed_files("HEAD").await.unwrap_or_default();
        if changed.is_empty() && !allow_no_changes {
            return Err(AgentError::NoChanges.into());
        }
        if changed.is_empty() && allow_no_changes {
            return Ok(());
        }

        let outcome = validation::validate(self.workspace.root(), &changed).await?;
        if outcome.ok {
            self.workspace.commit("agent: implementation").await?;
            return Ok(());
        }

        self.repair_and_revalidate(outcome, &changed).await
    }

    async fn repair_and_revalidate(
        &self,
        first_failure: ValidationOutcome,
        changed: &[String],
    ) -> Result<()> {
        let errors = first_failure.errors.join("\n");
        let repair_prompt = format!(
            "Validation failed with the following errors. Fix them:\n{errors}"
        );
        self.prompt(Category::Implement, &repair_prompt).await?;

        let outcome = validation::validate(self.workspace.root(), changed).await?;
        if outcome.ok {
            self.workspace.commit("agent: repair validation errors").await?;
            return Ok(());
        }

        Err(AgentError::UnfixableValidation(outcome.errors.join("\n")).into())
    }

    /// Re-invokes the agent with recently changed files pinned into its
    /// context, per the review prompt (§4.10).
    pub async fn self_review(&self) -> Result<()> {
        let changed = self.workspace.changed_files("HEAD~1").await.unwrap_or_default();
        let prompt = format!(
            "Review your own recent changes for correctness and quality. Files changed:\n{}",
            changed.join("\n")
        );
        self.prompt(Category::SelfReview, &prompt).await?;

        let still_changed = self.workspace.changed_files("HEAD").await.unwrap_or_default();
        if !still_changed.is_empty() {
            self.workspace.commit("agent: self review").await?;
        }
        Ok(())
    }

    pub async fn tests(&self) -> Result<TestsOutcome> {
        let prompt = "Write and run tests for the changes in this task. Report pass or fail \
                       and include any failing output verbatim."
            .to_string();
        let response = self.prompt(Category::Tests, &prompt).await?;

        let changed = self.workspace.changed_files("HEAD").await.unwrap_or_default();
        if !changed.is_empty() {
            self.workspace.commit("agent: tests").await?;
        }

        let passed = !response.to_ascii_lowercase().contains("fail");
        Ok(TestsOutcome { passed, output: response })
    }

    /// Two-step "is search critical?" check; the default is `NONE`, which
    /// emits no searches (§4.10).
    pub async fn search_context(&self, description: &str) -> Result<Option<String>> {
        let Some(search) = &self.search else {
            return Ok(None);
        };

        let check_prompt = format!(
            "Is external web search critical to completing this task? Answer with a single \
             word: NONE, or a short search query if so.\n\nTask:\n{description}"
        );
        let verdict = self.prompt(Category::SearchContext, &check_prompt).await?;
        let verdict = verdict.trim();
        if verdict.eq_ignore_ascii_case("none") || verdict.is_empty() {
            return Ok(None);
        }

        let results = search.search(verdict).await.unwrap_or_default();
        if results.is_empty() {
            return Ok(None);
        }

        let mut context = String::new();
        for result in results.into_iter().take(2) {
            context.push_str(&format!("- {} ({})\n  {}\n", result.title, result.url, result.snippet));
        }
        Ok(Some(context))
    }

    /// Starts the dev server, captures screenshots for `urls`, then stops
    /// the server — intentionally, so implementation doesn't fight a hot
    /// reloader (§4.8).
    pub async fn capture_before(
        &self,
        start_command: &[&str],
        urls: &[String],
        visual_diff: &VisualDiff,
    ) -> Result<Vec<Shot>> {
        self.capture(start_command, urls, visual_diff, false).await
    }

    /// Starts fresh with a cache clear (§4.8).
    pub async fn capture_after(
        &self,
        start_command: &[&str],
        urls: &[String],
        visual_diff: &VisualDiff,
    ) -> Result<Vec<Shot>> {
        self.capture(start_command, urls, visual_diff, true).await
    }

    async fn capture(
        &self,
        start_command: &[&str],
        urls: &[String],
        visual_diff: &VisualDiff,
        clear_cache_first: bool,
    ) -> Result<Vec<Shot>> {
        if clear_cache_first {
            devserver::clear_cache(self.workspace.root()).await;
        }

        let outcome = devserver::start(self.workspace.root(), start_command).await?;
        let server = match outcome {
            StartOutcome::Ready(server) => server,
            StartOutcome::Failed(error) if error.permits_repair() => {
                let repair_prompt =
                    "The dev server failed to compile (compilation hang). Fix the build.";
                self.prompt(Category::Implement, repair_prompt).await?;
                devserver::clear_cache(self.workspace.root()).await;
                match devserver::start(self.workspace.root(), start_command).await? {
                    StartOutcome::Ready(server) => server,
                    StartOutcome::Failed(error) => return Err(error.into()),
                }
            }
            StartOutcome::Failed(error) => return Err(error.into()),
        };

        let base_url = format!("http://127.0.0.1:{}", server.port());
        let shots = visual_diff.capture("shot", &base_url, urls).await;
        server.shutdown().await;
        shots
    }

    pub fn detect_urls(plan: &str) -> Vec<String> {
        visual_diff::extract_urls(plan)
    }

    pub fn is_frontend_change(plan: &str, files: &[String]) -> bool {
        visual_diff::is_frontend(plan, Some(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_at_word_boundary_keeps_prefix_and_cuts_whole_words() {
        let title = format!("[Walker] {}", "word ".repeat(20));
        let truncated = truncate_at_word_boundary(&title, 70);
        assert!(truncated.chars().count() <= 70);
        assert!(truncated.starts_with("[Walker] "));
        assert!(truncated.ends_with('…'));
        assert!(!truncated.trim_end_matches('…').ends_with("wor"));
    }

    #[test]
    fn truncate_at_word_boundary_is_noop_under_the_limit() {
        let title = "[Walker] Add a hello endpoint";
        assert_eq!(truncate_at_word_boundary(title, 70), title);
    }
}
