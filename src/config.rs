//! Configuration loading and validation.
//!
//! A single `Config` value is built once at startup, validated eagerly, and
//! then held immutably for the process lifetime (§9, "process-global
//! configuration via environment" re-architecture note). No component reads
//! an environment variable outside this module.

use crate::error::{ConfigError, Result};
use crate::dog::Dog;
use std::path::{Path, PathBuf};

/// Process-wide Walker configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub forge_repo: String,
    pub chat_bot_token: String,
    pub chat_app_token: String,
    pub store_url: String,
    pub dogs: Vec<Dog>,
    pub base_branch: String,
    pub forge_token: Option<String>,
    pub log_filter: String,
    pub workspace_root: PathBuf,
    pub max_workers: usize,
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn load() -> Result<Self> {
        let llm_api_key = required_env("LLM_API_KEY")?;
        let forge_repo = required_env("FORGE_REPO")?;
        let chat_bot_token = required_env("CHAT_BOT_TOKEN")?;
        let chat_app_token = required_env("CHAT_APP_TOKEN")?;
        let store_url = required_env("STORE_URL")?;

        let dogs = load_dog_roster()?;
        if dogs.is_empty() {
            return Err(ConfigError::EmptyRoster.into());
        }

        let base_branch = std::env::var("BASE_BRANCH").unwrap_or_else(|_| "main".into());
        let forge_token = std::env::var("FORGE_TOKEN").ok();
        let log_filter = std::env::var("WALKER_LOG").unwrap_or_else(|_| "info".into());

        let workspace_root = std::env::var("WALKER_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("walker-workspaces"));

        let max_workers = std::env::var("WALKER_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));

        Ok(Self {
            llm_api_key,
            forge_repo,
            chat_bot_token,
            chat_app_token,
            store_url,
            dogs,
            base_branch,
            forge_token,
            log_filter,
            workspace_root,
            max_workers,
        })
    }

    /// Load from a specific config-file path, falling back to env loading
    /// for anything the file does not set. Local-dev convenience only; the
    /// canonical source of truth is the environment.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    // SAFETY: single-threaded at startup, before any other
                    // component reads the environment.
                    unsafe {
                        std::env::set_var(key.trim(), value.trim());
                    }
                }
            }
        }
        Self::load()
    }

    /// Resolve the per-dog forge credential to use for orchestrator-only
    /// reads: the explicit `FORGE_TOKEN`, falling back to the first dog's
    /// credential (§6).
    pub fn orchestrator_forge_token(&self) -> &str {
        self.forge_token
            .as_deref()
            .unwrap_or_else(|| self.dogs[0].credential.as_str())
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()).into())
}

/// `DOGS` is a JSON array of `{name, email, credential}`; legacy single-dog
/// envs (`DOG_NAME`/`DOG_EMAIL`/`DOG_CREDENTIAL`) are recognized as a
/// fallback for a one-dog deployment that predates the roster format.
fn load_dog_roster() -> Result<Vec<Dog>> {
    if let Ok(raw) = std::env::var("DOGS") {
        let dogs: Vec<Dog> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("DOGS is not valid JSON: {e}")))?;
        return Ok(dogs);
    }

    if let (Ok(name), Ok(email), Ok(credential)) = (
        std::env::var("DOG_NAME"),
        std::env::var("DOG_EMAIL"),
        std::env::var("DOG_CREDENTIAL"),
    ) {
        return Ok(vec![Dog {
            name,
            email,
            credential,
        }]);
    }

    Ok(Vec::new())
}
