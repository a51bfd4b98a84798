//! Child-process runner speaking newline-delimited JSON.
//!
//! The scheduler writes one `start` line with the batch and its budget to the
//! child's stdin, then reads its stdout for a `complete` or `error` line. A
//! graceful stop writes a `stop` line and closes stdin; a forced stop kills
//! the process.
//!
//! ```text
//! -> {"type":"start","batch":{...},"budget":{"memory_mb":768,"bot_count":5}}
//! <- {"type":"complete","results":[{"bot_id":1,"success":true}]}
//! <- {"type":"error","message":"browser crashed"}
//! -> {"type":"stop"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Notify};

use crate::core::{
    Batch, ResourceBudget, Runner, RunnerBotReport, RunnerError, RunnerEvent, RunnerHandle,
    RunnerSession,
};

/// Environment variable carrying the memory budget (MiB) to the child.
pub const MEMORY_ENV: &str = "BOT_RUNNER_MEMORY_MB";
/// Environment variable carrying the batch id to the child.
pub const BATCH_ENV: &str = "BOT_RUNNER_BATCH_ID";

/// How long stdout may stay open after the child exits.
const STDOUT_LINGER: Duration = Duration::from_secs(1);

/// How to launch the child process.
#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
    /// Working directory; inherited when `None`.
    pub working_dir: Option<PathBuf>,
}

impl ProcessRunnerConfig {
    /// Launch `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Start {
        batch: &'a Batch,
        budget: ResourceBudget,
    },
    Stop,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Complete { results: Vec<RunnerBotReport> },
    Error { message: String },
    Log { message: String },
}

fn encode(message: &Outbound<'_>) -> Result<Vec<u8>, RunnerError> {
    let mut line =
        serde_json::to_vec(message).map_err(|e| RunnerError::Launch(format!("encode: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Runs each batch in its own child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: Arc<ProcessRunnerConfig>,
}

impl ProcessRunner {
    /// Runner launching processes per `config`.
    #[must_use]
    pub fn new(config: ProcessRunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn command(&self, batch: &Batch, budget: ResourceBudget) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.program);
        cmd.args(&cfg.args)
            .envs(cfg.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(MEMORY_ENV, budget.memory_mb.to_string())
            .env(BATCH_ENV, &batch.id)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cfg.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

struct ProcessHandle {
    batch_id: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill: Arc<Notify>,
    exited: watch::Receiver<bool>,
}

#[async_trait]
impl RunnerHandle for ProcessHandle {
    async fn request_graceful_stop(&self) {
        let Some(mut stdin) = self.stdin.lock().await.take() else {
            return;
        };
        let Ok(line) = encode(&Outbound::Stop) else {
            return;
        };
        if let Err(err) = stdin.write_all(&line).await {
            tracing::debug!(batch_id = %self.batch_id, error = %err, "stop line not delivered");
        }
        let _ = stdin.shutdown().await;
    }

    async fn force_stop(&self) {
        if !*self.exited.borrow() {
            self.kill.notify_one();
        }
    }

    async fn wait_exited(&self) {
        let mut rx = self.exited.clone();
        let _ = rx.wait_for(|exited| *exited).await;
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn start(&self, batch: Batch, budget: ResourceBudget) -> Result<RunnerSession, RunnerError> {
        let mut child = self.command(&batch, budget).spawn().map_err(|e| {
            RunnerError::Launch(format!("{}: {e}", self.config.program.display()))
        })?;
        let missing = |pipe: &str| RunnerError::Launch(format!("child {pipe} not captured"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        stdin
            .write_all(&encode(&Outbound::Start {
                batch: &batch,
                budget,
            })?)
            .await?;
        stdin.flush().await?;

        let pid = child.id();
        tracing::debug!(batch_id = %batch.id, ?pid, memory_mb = budget.memory_mb, "runner process spawned");

        let (tx, rx) = mpsc::channel(8);
        let (exited_tx, exited_rx) = watch::channel(false);
        let kill = Arc::new(Notify::new());

        let reader = {
            let tx = tx.clone();
            let batch_id = batch.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let event = match serde_json::from_str::<Inbound>(&line) {
                        Ok(Inbound::Complete { results }) => RunnerEvent::Completed(results),
                        Ok(Inbound::Error { message }) => RunnerEvent::Errored(message),
                        Ok(Inbound::Log { message }) => {
                            tracing::debug!(batch_id = %batch_id, line = %message, "runner log");
                            continue;
                        }
                        Err(_) => {
                            tracing::trace!(batch_id = %batch_id, line = %line, "ignoring non-protocol output");
                            continue;
                        }
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            })
        };

        {
            let batch_id = batch.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(batch_id = %batch_id, line = %line, "runner stderr");
                }
            });
        }

        {
            let kill = Arc::clone(&kill);
            let batch_id = batch.id.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    () = kill.notified() => {
                        if let Err(err) = child.start_kill() {
                            tracing::debug!(batch_id = %batch_id, error = %err, "kill failed");
                        }
                        child.wait().await
                    }
                };
                let code = match status {
                    Ok(status) => status.code(),
                    Err(err) => {
                        tracing::warn!(batch_id = %batch_id, error = %err, "waiting on runner failed");
                        None
                    }
                };
                // a report written just before exit must be seen before the exit
                let _ = tokio::time::timeout(STDOUT_LINGER, reader).await;
                exited_tx.send_replace(true);
                tracing::debug!(batch_id = %batch_id, ?code, "runner process exited");
                let _ = tx.send(RunnerEvent::Exited(code)).await;
            });
        }

        Ok(RunnerSession {
            handle: Arc::new(ProcessHandle {
                batch_id: batch.id,
                stdin: tokio::sync::Mutex::new(Some(stdin)),
                kill,
                exited: exited_rx,
            }),
            events: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_line_is_tagged() {
        let batch = Batch {
            id: "b-1".into(),
            bots: Vec::new(),
            meeting_id: "m".into(),
            credential: String::new(),
            connection: crate::core::ConnectionParams::optimized("sig".into()),
            duration_minutes: 1,
        };
        let line = encode(&Outbound::Start {
            batch: &batch,
            budget: ResourceBudget {
                memory_mb: 512,
                bot_count: 0,
            },
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["batch"]["id"], "b-1");
        assert_eq!(value["budget"]["memory_mb"], 512);
        assert_eq!(line.last(), Some(&b'\n'));
    }

    #[test]
    fn inbound_lines_parse() {
        let complete: Inbound =
            serde_json::from_str(r#"{"type":"complete","results":[{"bot_id":3,"success":false,"error":"x"}]}"#)
                .unwrap();
        assert!(matches!(complete, Inbound::Complete { ref results } if results[0].bot_id == 3));
        let error: Inbound = serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert!(matches!(error, Inbound::Error { ref message } if message == "boom"));
        assert!(serde_json::from_str::<Inbound>("plain text").is_err());
    }
}
