//! Child-process execution seam.
//!
//! All platform CLI invocations go through the [`ProcessRunner`] trait so
//! the orchestration code can be exercised against a scripted
//! [`MockProcessRunner`] instead of a real `wrangler` binary.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::errors::PlatformError;
use crate::events::{DeployEvent, EventSender, OutputStream};
use crate::util::CancelFlag;

/// Cap on accumulated stdout+stderr per invocation.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default per-invocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a terminated child gets to exit before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A fully assembled command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command as a single display line (for logs, events and mocks).
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes commands; implemented by the real tokio runner and by test mocks.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command to completion, streaming output lines into `events`.
    ///
    /// A non-zero exit is NOT an error at this layer: callers decide whether
    /// an exit code is fatal. `Err` means the process could not be run at
    /// all (spawn failure, timeout, output overflow).
    async fn run(
        &self,
        spec: &CommandSpec,
        events: &EventSender,
    ) -> Result<CommandOutput, PlatformError>;
}

/// Real runner backed by `tokio::process`.
///
/// Output collection races the shared cancellation flag: on cancellation
/// the child is sent a terminate signal and killed after
/// [`TERMINATE_GRACE`]. A per-command timeout kills outright.
#[derive(Debug, Default)]
pub struct TokioProcessRunner {
    cancel: CancelFlag,
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelFlag) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        events: &EventSender,
    ) -> Result<CommandOutput, PlatformError> {
        let command_line = spec.display_line();
        if self.cancel.is_cancelled() {
            return Err(PlatformError::Cancelled {
                command: command_line,
            });
        }
        tracing::debug!(target: "stratus::process", command = %command_line, "spawning");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| PlatformError::SpawnFailed {
            command: command_line.clone(),
            source,
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let collect = async {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut stdout_buf = String::new();
            let mut stderr_buf = String::new();
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line {
                        Ok(Some(line)) => {
                            events.emit(DeployEvent::CliOutput {
                                command: command_line.clone(),
                                stream: OutputStream::Stdout,
                                line: line.clone(),
                            });
                            stdout_buf.push_str(&line);
                            stdout_buf.push('\n');
                        }
                        _ => out_done = true,
                    },
                    line = err_lines.next_line(), if !err_done => match line {
                        Ok(Some(line)) => {
                            events.emit(DeployEvent::CliOutput {
                                command: command_line.clone(),
                                stream: OutputStream::Stderr,
                                line: line.clone(),
                            });
                            stderr_buf.push_str(&line);
                            stderr_buf.push('\n');
                        }
                        _ => err_done = true,
                    },
                }

                if stdout_buf.len() + stderr_buf.len() > MAX_OUTPUT_BYTES {
                    return Err(PlatformError::OutputOverflow {
                        command: command_line.clone(),
                        limit: MAX_OUTPUT_BYTES,
                    });
                }
            }

            Ok((stdout_buf, stderr_buf))
        };

        let collected = tokio::select! {
            collected = tokio::time::timeout(spec.timeout, collect) => collected,
            _ = self.cancel.cancelled() => {
                tracing::warn!(
                    target: "stratus::process",
                    command = %command_line,
                    "cancellation requested, terminating child"
                );
                terminate(&mut child);
                if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                return Err(PlatformError::Cancelled {
                    command: command_line.clone(),
                });
            }
        };

        let (stdout_buf, stderr_buf) = match collected {
            Ok(Ok(buffers)) => buffers,
            Ok(Err(overflow)) => {
                let _ = child.kill().await;
                return Err(overflow);
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(PlatformError::Timeout {
                    command: command_line,
                    seconds: spec.timeout.as_secs(),
                });
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|source| PlatformError::SpawnFailed {
                command: command_line.clone(),
                source,
            })?;
        let code = status.code().unwrap_or(-1);
        tracing::debug!(target: "stratus::process", command = %command_line, code, "finished");

        Ok(CommandOutput {
            code,
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }
}

/// Ask the child to exit cleanly. On unix this is SIGTERM so the platform
/// CLI can release its own resources; elsewhere the runtime only offers an
/// immediate kill.
fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        return;
    }
    let _ = child.start_kill();
}

/// Scripted response for [`MockProcessRunner`].
#[derive(Debug, Clone)]
enum MockResponse {
    Output(CommandOutput),
    SpawnFailure,
}

/// Mock runner that matches command lines by substring and records every
/// invocation for assertions.
#[derive(Debug, Default)]
pub struct MockProcessRunner {
    responses: Mutex<Vec<(String, VecDeque<MockResponse>)>>,
    default_response: Mutex<Option<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `output` for any command whose display line contains
    /// `matcher`. Repeated registrations for the same matcher queue up and
    /// are consumed in order (the last response is sticky).
    pub fn with_response(self, matcher: impl Into<String>, output: CommandOutput) -> Self {
        let matcher = matcher.into();
        let mut responses = self.responses.lock().expect("mock lock");
        if let Some((_, queue)) = responses.iter_mut().find(|(m, _)| *m == matcher) {
            queue.push_back(MockResponse::Output(output));
        } else {
            responses.push((matcher, VecDeque::from([MockResponse::Output(output)])));
        }
        drop(responses);
        self
    }

    /// Fail to spawn any command whose display line contains `matcher`.
    pub fn with_spawn_failure(self, matcher: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("mock lock")
            .push((matcher.into(), VecDeque::from([MockResponse::SpawnFailure])));
        self
    }

    /// Fallback response for unmatched commands (default: exit 0, no output).
    pub fn with_default(self, output: CommandOutput) -> Self {
        *self.default_response.lock().expect("mock lock") = Some(output);
        self
    }

    /// Display lines of every command run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }

    /// Number of invocations whose display line contains `matcher`.
    pub fn call_count(&self, matcher: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.contains(matcher))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        events: &EventSender,
    ) -> Result<CommandOutput, PlatformError> {
        let command_line = spec.display_line();
        self.calls
            .lock()
            .expect("mock lock")
            .push(command_line.clone());

        let response = {
            let mut responses = self.responses.lock().expect("mock lock");
            responses
                .iter_mut()
                .find(|(matcher, _)| command_line.contains(matcher.as_str()))
                .map(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front().expect("non-empty queue")
                    } else {
                        queue.front().cloned().expect("non-empty queue")
                    }
                })
        };

        match response {
            Some(MockResponse::SpawnFailure) => Err(PlatformError::SpawnFailed {
                command: command_line,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock spawn failure"),
            }),
            Some(MockResponse::Output(output)) => {
                for line in output.stdout.lines() {
                    events.emit(DeployEvent::CliOutput {
                        command: command_line.clone(),
                        stream: OutputStream::Stdout,
                        line: line.to_string(),
                    });
                }
                Ok(output)
            }
            None => {
                let fallback = self
                    .default_response
                    .lock()
                    .expect("mock lock")
                    .clone()
                    .unwrap_or_default();
                Ok(fallback)
            }
        }
    }
}
