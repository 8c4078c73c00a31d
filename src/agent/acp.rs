//! Low-level ACP transport: spawns the editing-agent subprocess, speaks
//! the agent-client-protocol over its stdio, and supervises file writes
//! and terminal commands the agent issues against the task's working
//! tree. The agent is a genuinely separate, untrusted process — this is
//! the structured-protocol boundary named in §4.10.

use crate::error::{AgentError, Result};
use agent_client_protocol::{
    Agent as _, ClientCapabilities, ClientSideConnection, ContentBlock, ContentChunk,
    CreateTerminalRequest, CreateTerminalResponse, Error as AcpError, FileSystemCapability,
    InitializeRequest, KillTerminalCommandRequest, KillTerminalCommandResponse, NewSessionRequest,
    ProtocolVersion, PromptRequest, ReadTextFileRequest, ReadTextFileResponse,
    ReleaseTerminalRequest, ReleaseTerminalResponse, SessionUpdate, TerminalExitStatus, TerminalId,
    TerminalOutputRequest, TerminalOutputResponse, WaitForTerminalExitRequest,
    WaitForTerminalExitResponse, WriteTextFileRequest, WriteTextFileResponse,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

const MAX_STDERR_LOG_BYTES: usize = 64 * 1024;
const DEFAULT_TERMINAL_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;
const PROMPT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub struct AgentSubprocess {
    command: String,
    args: Vec<String>,
}

impl AgentSubprocess {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self { command: command.into(), args }
    }

    /// Spawns the agent in `workspace_root`, sends a single prompt, and
    /// returns its final message text. `workspace_root` bounds every file
    /// read/write the agent attempts.
    pub async fn prompt(&self, workspace_root: &Path, message: &str) -> Result<String> {
        if self.command.trim().is_empty() {
            return Err(AgentError::SpawnFailed("empty agent command".into()).into());
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::SpawnFailed(e.to_string()))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        let workspace_root = workspace_root
            .canonicalize()
            .unwrap_or_else(|_| workspace_root.to_path_buf());
        let client = Arc::new(EditingAgentClient::new(workspace_root.clone()));

        let result = tokio::task::LocalSet::new()
            .run_until(async {
                let (connection, io_task) = ClientSideConnection::new(
                    client.clone(),
                    stdin.compat_write(),
                    stdout.compat(),
                    |future| {
                        tokio::task::spawn_local(future);
                    },
                );

                tokio::task::spawn_local(async move {
                    if let Err(error) = io_task.await {
                        tracing::debug!(%error, "agent IO task ended with error");
                    }
                });

                let init = InitializeRequest::new(ProtocolVersion::LATEST).client_capabilities(
                    ClientCapabilities::new()
                        .fs(FileSystemCapability::new()
                            .read_text_file(true)
                            .write_text_file(true))
                        .terminal(true),
                );
                connection
                    .initialize(init)
                    .await
                    .map_err(|e| AgentError::Protocol(e.to_string()))?;

                let session = connection
                    .new_session(NewSessionRequest::new(workspace_root.clone()))
                    .await
                    .map_err(|e| AgentError::Protocol(e.to_string()))?;

                let request =
                    PromptRequest::new(session.session_id.clone(), vec![ContentBlock::from(message)]);

                tokio::time::timeout(PROMPT_TIMEOUT, connection.prompt(request))
                    .await
                    .map_err(|_| AgentError::Protocol("prompt timed out".into()))?
                    .map_err(|e| AgentError::Protocol(e.to_string()))?;

                Ok::<String, AgentError>(client.take_text().await)
            })
            .await;

        let _ = child.start_kill();
        let _ = child.wait().await;

        Ok(result?)
    }
}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut chunk = [0u8; 2048];
    let mut buffer = Vec::new();
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                let remaining = MAX_STDERR_LOG_BYTES.saturating_sub(buffer.len());
                if remaining == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..read.min(remaining)]);
            }
        }
    }
    if !buffer.is_empty() {
        tracing::debug!(stderr = %String::from_utf8_lossy(&buffer), "editing agent stderr");
    }
}

struct TerminalEntry {
    child: Mutex<Child>,
    output: Mutex<Vec<u8>>,
    output_limit: usize,
    truncated: AtomicBool,
    exit_status: Mutex<Option<std::process::ExitStatus>>,
}

impl TerminalEntry {
    fn new(child: Child, output_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            child: Mutex::new(child),
            output: Mutex::new(Vec::new()),
            output_limit,
            truncated: AtomicBool::new(false),
            exit_status: Mutex::new(None),
        })
    }

    async fn poll_exit_status(&self) -> std::io::Result<Option<std::process::ExitStatus>> {
        let mut stored = self.exit_status.lock().await;
        if stored.is_none()
            && let Some(status) = self.child.lock().await.try_wait()?
        {
            *stored = Some(status);
        }
        Ok(*stored)
    }

    async fn wait_for_exit(&self) -> std::io::Result<std::process::ExitStatus> {
        {
            let stored = self.exit_status.lock().await;
            if let Some(status) = *stored {
                return Ok(status);
            }
        }
        let status = self.child.lock().await.wait().await?;
        *self.exit_status.lock().await = Some(status);
        Ok(status)
    }
}

/// Implements the ACP `Client` role: answers the agent's file-read/write
/// and terminal requests, containing all paths to the task's workspace
/// root, and accumulates the agent's message text.
struct EditingAgentClient {
    workspace_root: PathBuf,
    terminals: Mutex<HashMap<String, Arc<TerminalEntry>>>,
    collected_text: Mutex<String>,
}

impl EditingAgentClient {
    fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            terminals: Mutex::new(HashMap::new()),
            collected_text: Mutex::new(String::new()),
        }
    }

    async fn take_text(&self) -> String {
        std::mem::take(&mut *self.collected_text.lock().await)
    }

    fn resolve_path(&self, path: &Path) -> agent_client_protocol::Result<PathBuf> {
        if !path.is_absolute() {
            return Err(AcpError::invalid_params().data("path must be absolute"));
        }

        let candidate = if path.exists() {
            path.canonicalize()
                .map_err(|e| AcpError::resource_not_found(Some(path.display().to_string())).data(e.to_string()))?
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| AcpError::invalid_params().data("path has no parent"))?;
            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| AcpError::resource_not_found(Some(parent.display().to_string())).data(e.to_string()))?;
            canonical_parent.join(
                path.file_name()
                    .ok_or_else(|| AcpError::invalid_params().data("path missing file name"))?,
            )
        };

        if !candidate.starts_with(&self.workspace_root) {
            return Err(AcpError::invalid_params().data(format!(
                "path '{}' escapes workspace root '{}'",
                candidate.display(),
                self.workspace_root.display()
            )));
        }

        Ok(candidate)
    }

    async fn terminal_entry(
        &self,
        terminal_id: &TerminalId,
    ) -> agent_client_protocol::Result<Arc<TerminalEntry>> {
        self.terminals
            .lock()
            .await
            .get(terminal_id.0.as_ref())
            .cloned()
            .ok_or_else(|| AcpError::resource_not_found(Some(terminal_id.0.to_string())))
    }
}

#[async_trait::async_trait(?Send)]
impl agent_client_protocol::Client for EditingAgentClient {
    async fn request_permission(
        &self,
        args: agent_client_protocol::RequestPermissionRequest,
    ) -> agent_client_protocol::Result<agent_client_protocol::RequestPermissionResponse> {
        let selected = args
            .options
            .iter()
            .find(|o| matches!(o.kind, agent_client_protocol::PermissionOptionKind::AllowOnce))
            .or_else(|| args.options.first())
            .ok_or_else(|| AcpError::invalid_params().data("permission request has no options"))?;

        Ok(agent_client_protocol::RequestPermissionResponse::new(
            agent_client_protocol::RequestPermissionOutcome::Selected(
                agent_client_protocol::SelectedPermissionOutcome::new(selected.option_id.clone()),
            ),
        ))
    }

    async fn session_notification(
        &self,
        args: agent_client_protocol::SessionNotification,
    ) -> agent_client_protocol::Result<()> {
        if let SessionUpdate::AgentMessageChunk(ContentChunk {
            content: ContentBlock::Text(text),
            ..
        }) = args.update
        {
            self.collected_text.lock().await.push_str(&text.text);
        }
        Ok(())
    }

    async fn write_text_file(
        &self,
        args: WriteTextFileRequest,
    ) -> agent_client_protocol::Result<WriteTextFileResponse> {
        let path = self.resolve_path(&args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AcpError::into_internal_error)?;
        }
        tokio::fs::write(&path, args.content)
            .await
            .map_err(AcpError::into_internal_error)?;
        Ok(WriteTextFileResponse::new())
    }

    async fn read_text_file(
        &self,
        args: ReadTextFileRequest,
    ) -> agent_client_protocol::Result<ReadTextFileResponse> {
        let path = self.resolve_path(&args.path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(AcpError::into_internal_error)?;
        Ok(ReadTextFileResponse::new(content))
    }

    async fn create_terminal(
        &self,
        args: CreateTerminalRequest,
    ) -> agent_client_protocol::Result<CreateTerminalResponse> {
        let mut cmd = Command::new(&args.command);
        cmd.args(&args.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cwd = match args.cwd {
            Some(cwd) => self.resolve_path(&cwd)?,
            None => self.workspace_root.clone(),
        };
        cmd.current_dir(cwd);

        for env_var in args.env {
            cmd.env(env_var.name, env_var.value);
        }

        let mut child = cmd.spawn().map_err(AcpError::into_internal_error)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let output_limit = args
            .output_byte_limit
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TERMINAL_OUTPUT_LIMIT_BYTES);
        let entry = TerminalEntry::new(child, output_limit);

        if let Some(reader) = stdout {
            spawn_output_reader(entry.clone(), reader);
        }
        if let Some(reader) = stderr {
            spawn_output_reader(entry.clone(), reader);
        }

        let terminal_id = TerminalId::new(format!("term_{}", uuid::Uuid::new_v4()));
        self.terminals
            .lock()
            .await
            .insert(terminal_id.0.to_string(), entry);

        Ok(CreateTerminalResponse::new(terminal_id))
    }

    async fn terminal_output(
        &self,
        args: TerminalOutputRequest,
    ) -> agent_client_protocol::Result<TerminalOutputResponse> {
        let entry = self.terminal_entry(&args.terminal_id).await?;
        let exit_status = entry.poll_exit_status().await.map_err(AcpError::into_internal_error)?;
        let output = String::from_utf8_lossy(&entry.output.lock().await).into_owned();
        Ok(
            TerminalOutputResponse::new(output, entry.truncated.load(Ordering::Relaxed))
                .exit_status(exit_status.map(to_terminal_exit_status)),
        )
    }

    async fn release_terminal(
        &self,
        args: ReleaseTerminalRequest,
    ) -> agent_client_protocol::Result<ReleaseTerminalResponse> {
        if let Some(entry) = self.terminals.lock().await.remove(args.terminal_id.0.as_ref()) {
            let mut child = entry.child.lock().await;
            if child.try_wait().map_err(AcpError::into_internal_error)?.is_none() {
                let _ = child.kill().await;
            }
        }
        Ok(ReleaseTerminalResponse::new())
    }

    async fn wait_for_terminal_exit(
        &self,
        args: WaitForTerminalExitRequest,
    ) -> agent_client_protocol::Result<WaitForTerminalExitResponse> {
        let entry = self.terminal_entry(&args.terminal_id).await?;
        let status = entry.wait_for_exit().await.map_err(AcpError::into_internal_error)?;
        Ok(WaitForTerminalExitResponse::new(to_terminal_exit_status(status)))
    }

    async fn kill_terminal_command(
        &self,
        args: KillTerminalCommandRequest,
    ) -> agent_client_protocol::Result<KillTerminalCommandResponse> {
        let entry = self.terminal_entry(&args.terminal_id).await?;
        let mut child = entry.child.lock().await;
        if child.try_wait().map_err(AcpError::into_internal_error)?.is_none() {
            child.kill().await.map_err(AcpError::into_internal_error)?;
        }
        Ok(KillTerminalCommandResponse::new())
    }
}

fn spawn_output_reader(
    entry: Arc<TerminalEntry>,
    mut reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
) {
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            let mut output = entry.output.lock().await;
            output.extend_from_slice(&chunk[..read]);
            if output.len() > entry.output_limit {
                let overflow = output.len() - entry.output_limit;
                output.drain(0..overflow);
                entry.truncated.store(true, Ordering::Relaxed);
            }
        }
    });
}

fn to_terminal_exit_status(status: std::process::ExitStatus) -> TerminalExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        TerminalExitStatus::new()
            .exit_code(status.code().and_then(|c| u32::try_from(c).ok()))
            .signal(status.signal().map(|s| s.to_string()))
    }
    #[cfg(not(unix))]
    {
        TerminalExitStatus::new().exit_code(status.code().and_then(|c| u32::try_from(c).ok()))
    }
}
