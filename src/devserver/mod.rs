//! Dev-Server Controller (C7): port negotiation, process start, readiness
//! detection, shutdown (§4.7).

pub mod classifier;

use crate::error::{DevServerError, Result};
use classifier::{ReadinessTracker, Verdict};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;

const PREFERRED_PORT: u16 = 3000;
const ALTERNATIVE_PORTS: &[u16] = &[3001, 3002, 4000, 5173, 8080];
const CACHE_DIRS: &[&str] = &[".next", ".vite", "dist", ".cache", "out"];
const READINESS_TIMEOUT: Duration = Duration::from_secs(180);

pub struct DevServer {
    child: Child,
    port: u16,
}

/// Outcome of a full start-and-wait-for-readiness cycle.
pub enum StartOutcome {
    Ready(DevServer),
    Failed(DevServerError),
}

impl DevServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn shutdown(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Deletes known build-cache directories before start, used for the
/// "after" capture so stale artifacts don't mask new code (§4.7/§4.8).
pub async fn clear_cache(root: &Path) {
    for dir in CACHE_DIRS {
        let path = root.join(dir);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_dir_all(&path).await;
        }
    }
}

async fn pick_free_port() -> Option<u16> {
    for candidate in std::iter::once(PREFERRED_PORT).chain(ALTERNATIVE_PORTS.iter().copied()) {
        if tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// Starts `npm run dev` (or an equivalent start command) in `root`, streams
/// stdout for readiness/failure signals, and returns once the server is
/// ready or a terminal failure mode fires.
pub async fn start(root: &Path, start_command: &[&str]) -> Result<StartOutcome> {
    let Some(port) = pick_free_port().await else {
        return Ok(StartOutcome::Failed(DevServerError::NoFreePort));
    };

    let [program, args @ ..] = start_command else {
        return Ok(StartOutcome::Failed(DevServerError::NoFreePort));
    };

    let mut child = Command::new(program)
        .args(args)
        .current_dir(root)
        .env("PORT", port.to_string())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn dev server: {e}"))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let mut lines = BufReader::new(stdout).lines();

    let mut tracker = ReadinessTracker::new(Instant::now());
    let deadline = Instant::now() + READINESS_TIMEOUT;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/");

    loop {
        if Instant::now() >= deadline {
            let _ = child.start_kill();
            return Ok(StartOutcome::Failed(DevServerError::CompileHang));
        }

        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => tracker.on_line(&text, Instant::now()),
                    Ok(None) => {
                        let status = child.wait().await.ok();
                        let code = status.and_then(|s| s.code()).unwrap_or(-1);
                        return Ok(StartOutcome::Failed(DevServerError::ExitedNonZero(code)));
                    }
                    Err(e) => return Err(anyhow::anyhow!("reading dev server stdout: {e}").into()),
                }
            }
            _ = sleep(tracker.poll_timeout()) => {
                match client.get(&url).timeout(tracker.poll_timeout()).send().await {
                    Ok(_) => tracker.on_http_success(),
                    Err(_) => tracker.on_http_timeout(),
                }
            }
        }

        match tracker.verdict(Instant::now()) {
            Verdict::Healthy => {
                if tracker.is_confirmed_ready() {
                    return Ok(StartOutcome::Ready(DevServer { child, port }));
                }
            }
            Verdict::CompileError => {
                let message = tracker.compile_error_message().unwrap_or_default().to_string();
                let _ = child.start_kill();
                return Ok(StartOutcome::Failed(DevServerError::CompileError(message)));
            }
            Verdict::CompileHang => {
                let _ = child.start_kill();
                return Ok(StartOutcome::Failed(DevServerError::CompileHang));
            }
            Verdict::RuntimeHang => {
                let _ = child.start_kill();
                return Ok(StartOutcome::Failed(DevServerError::RuntimeHang(4)));
            }
            Verdict::SilentHang => {
                let _ = child.start_kill();
                return Ok(StartOutcome::Failed(DevServerError::SilentHang));
            }
        }
    }
}
