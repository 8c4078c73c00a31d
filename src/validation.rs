//! Validation Gate (C6): project-kind detection, bounded dependency
//! install, type-check invocation, error classification (§4.6).

use crate::error::Result;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    JavaScript,
    Python,
    Go,
    Rust,
}

/// Multiple kinds may be present in the same tree.
pub async fn detect_project_kinds(root: &Path) -> Vec<ProjectKind> {
    let mut kinds = Vec::new();
    if exists(root, "package.json").await {
        kinds.push(ProjectKind::JavaScript);
    }
    if exists(root, "pyproject.toml").await
        || exists(root, "setup.py").await
        || exists(root, "requirements.txt").await
    {
        kinds.push(ProjectKind::Python);
    }
    if exists(root, "go.mod").await {
        kinds.push(ProjectKind::Go);
    }
    if exists(root, "Cargo.toml").await {
        kinds.push(ProjectKind::Rust);
    }
    kinds
}

async fn exists(root: &Path, name: &str) -> bool {
    tokio::fs::try_exists(root.join(name)).await.unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { ok: true, errors: Vec::new() }
    }

    fn failed(output: String) -> Self {
        Self { ok: false, errors: vec![output] }
    }
}

/// Runs whichever gates apply to the project kinds found under `root`,
/// given the set of changed file paths (relative to `root`).
pub async fn validate(root: &Path, changed_files: &[String]) -> Result<ValidationOutcome> {
    let kinds = detect_project_kinds(root).await;
    let mut ran_any = false;

    for kind in kinds {
        match kind {
            ProjectKind::JavaScript => {
                if let Some(outcome) = validate_javascript(root).await? {
                    ran_any = true;
                    if !outcome.ok {
                        return Ok(outcome);
                    }
                }
            }
            ProjectKind::Python => {
                if changed_files.iter().any(|f| f.ends_with(".py")) {
                    if let Some(outcome) = validate_python(root).await? {
                        ran_any = true;
                        if !outcome.ok {
                            return Ok(outcome);
                        }
                    }
                }
            }
            ProjectKind::Go | ProjectKind::Rust => {
                // No dedicated gate defined for these kinds (§4.6); detection
                // is recorded for future extension but no check runs yet.
            }
        }
    }

    let _ = ran_any;
    Ok(ValidationOutcome::ok())
}

/// Returns `None` when the toolchain itself could not be invoked (a
/// transport/command-missing failure, which is not an error per §4.6).
async fn validate_javascript(root: &Path) -> Result<Option<ValidationOutcome>> {
    if !exists(root, "node_modules").await {
        let installed = run_bounded(root, "npm", &["install"], INSTALL_TIMEOUT).await?;
        match installed {
            Some(result) if !result.success => {
                return Ok(Some(ValidationOutcome::failed(result.combined())));
            }
            None => return Ok(None),
            _ => {}
        }
    }

    let Some(config_dir) = find_typecheck_config(root).await else {
        return Ok(None);
    };

    let result = run_bounded(&config_dir, "npx", &["tsc", "--noEmit"], Duration::from_secs(120)).await?;
    match result {
        None => Ok(None),
        Some(result) if result.success => Ok(Some(ValidationOutcome::ok())),
        Some(result) => Ok(Some(ValidationOutcome::failed(result.combined()))),
    }
}

async fn validate_python(root: &Path) -> Result<Option<ValidationOutcome>> {
    let result = run_bounded(root, "pyright", &[], Duration::from_secs(120)).await?;
    match result {
        None => Ok(None),
        Some(result) if result.success => Ok(Some(ValidationOutcome::ok())),
        Some(result) => Ok(Some(ValidationOutcome::failed(result.combined()))),
    }
}

/// Starting from the repo root, then a short list of conventional monorepo
/// paths, look for a `tsconfig.json`.
async fn find_typecheck_config(root: &Path) -> Option<std::path::PathBuf> {
    let candidates = [
        root.to_path_buf(),
        root.join("apps/web"),
        root.join("packages/web"),
        root.join("web"),
        root.join("frontend"),
    ];
    for candidate in candidates {
        if tokio::fs::try_exists(candidate.join("tsconfig.json"))
            .await
            .unwrap_or(false)
        {
            return Some(candidate);
        }
    }
    None
}

struct CommandResult {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CommandResult {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runs `program args...` in `cwd`; returns `Ok(None)` if the program could
/// not be spawned at all (missing toolchain), distinct from `Ok(Some(_))`
/// carrying a real exit status.
async fn run_bounded(
    cwd: &Path,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<Option<CommandResult>> {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(Some(CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })),
        Ok(Err(_)) => Ok(None),
        Err(_) => Err(crate::error::ValidationError::Timeout(timeout.as_secs()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_no_kinds_in_empty_tree() {
        let dir = scratch_dir("empty");
        let kinds = detect_project_kinds(&dir).await;
        assert!(kinds.is_empty());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn detects_rust_kind_from_cargo_toml() {
        let dir = scratch_dir("rust-kind");
        tokio::fs::write(dir.join("Cargo.toml"), "[package]\n").await.unwrap();
        let kinds = detect_project_kinds(&dir).await;
        assert_eq!(kinds, vec![ProjectKind::Rust]);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "walker-validation-test-{label}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
