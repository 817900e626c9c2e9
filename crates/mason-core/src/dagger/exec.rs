use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Marker printed by Dagger's interactive progress footer.
const INTERACTIVE_FOOTER_MARKER: &str = " · home first · end last · ";

/// Errors produced while executing a Dagger script.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("script path is required")]
    MissingScript,

    #[error("failed to spawn {binary:?} for dagger script {script:?}")]
    Spawn {
        binary: String,
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait on dagger script {script:?}")]
    Wait {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to execute dagger script {script:?}: {}", describe_exit(.code))]
    Failed { script: PathBuf, code: Option<i32> },

    #[error("failed to read the output of dagger script {script:?}")]
    Read {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create log file {path:?}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_owned(),
    }
}

/// One script execution request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// The script file handed to the binary as its last argument.
    pub script_path: PathBuf,
    /// Extra environment assignments, as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Extra arguments placed before the script path.
    pub args: Vec<String>,
    /// File receiving the cleaned stderr lines. Created or truncated.
    pub stderr_log: PathBuf,
}

/// What an execution produced.
///
/// `stdout` is always populated, even when `result` is an error, so callers
/// can publish diagnostics before handling the failure.
#[derive(Debug)]
pub struct ExecOutcome {
    pub stdout: String,
    pub result: Result<(), ExecError>,
}

impl ExecOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            result: Ok(()),
        }
    }

    pub fn failure(stdout: impl Into<String>, error: ExecError) -> Self {
        Self {
            stdout: stdout.into(),
            result: Err(error),
        }
    }
}

/// Runs script files. The production implementation shells out to the
/// `dagger` binary; tests substitute scripted fakes.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn exec(&self, request: &ExecRequest) -> ExecOutcome;
}

/// Executes scripts with the Dagger CLI.
#[derive(Debug, Clone)]
pub struct DaggerExecutor {
    binary: String,
    echo_stderr: bool,
}

impl DaggerExecutor {
    /// `echo_stderr` mirrors Dagger's progress output to our own stderr
    /// while the script runs. The log file is written either way.
    pub fn new(binary: impl Into<String>, echo_stderr: bool) -> Self {
        Self {
            binary: binary.into(),
            echo_stderr,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl ScriptExecutor for DaggerExecutor {
    async fn exec(&self, request: &ExecRequest) -> ExecOutcome {
        if request.script_path.as_os_str().is_empty() {
            return ExecOutcome::failure(String::new(), ExecError::MissingScript);
        }

        let mut log_file = match tokio::fs::File::create(&request.stderr_log).await {
            Ok(f) => f,
            Err(source) => {
                return ExecOutcome::failure(
                    String::new(),
                    ExecError::Log {
                        path: request.stderr_log.clone(),
                        source,
                    },
                );
            }
        };

        let mut cmd = Command::new(&self.binary);
        cmd.args(&request.args)
            .arg(&request.script_path)
            .env("DAGGER_NO_NAG", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for assignment in &request.env {
            let (key, value) = assignment
                .split_once('=')
                .unwrap_or((assignment.as_str(), ""));
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return ExecOutcome::failure(
                    String::new(),
                    ExecError::Spawn {
                        binary: self.binary.clone(),
                        script: request.script_path.clone(),
                        source,
                    },
                );
            }
        };

        // Both pipes are drained while waiting so a chatty child cannot
        // fill a pipe buffer and block.
        let mut stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let echo = self.echo_stderr;

        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
        };

        // Lines are split on raw bytes; invalid UTF-8 is replaced, never
        // allowed to stop the drain.
        let read_stderr = async {
            let mut lines_out = Vec::new();
            if let Some(pipe) = stderr_pipe {
                let mut reader = BufReader::new(pipe);
                let mut terminal = tokio::io::stderr();
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to read Dagger's stderr");
                            break;
                        }
                    }
                    if echo {
                        let _ = terminal.write_all(&buf).await;
                    }
                    let line = String::from_utf8_lossy(&buf);
                    lines_out.push(line.trim_end_matches(['\n', '\r']).to_owned());
                }
            }
            lines_out
        };

        let (wait_result, stdout, stderr_lines) =
            tokio::join!(child.wait(), read_stdout, read_stderr);

        // The log is written before the exit status is looked at, so a
        // failing script still leaves its diagnostics behind.
        let mut warned = false;
        for line in stderr_lines.iter().filter_map(|l| clean_stderr_line(l)) {
            if let Err(e) = log_file.write_all(format!("{line}\n").as_bytes()).await {
                if !warned {
                    tracing::warn!(
                        path = %request.stderr_log.display(),
                        error = %e,
                        "failed to write Dagger's stderr"
                    );
                    warned = true;
                }
            }
        }
        if let Err(e) = log_file.flush().await {
            tracing::warn!(path = %request.stderr_log.display(), error = %e, "failed to flush log file");
        }

        let stdout = match stdout {
            Ok(stdout) => stdout,
            Err(source) => {
                return ExecOutcome::failure(
                    String::new(),
                    ExecError::Read {
                        script: request.script_path.clone(),
                        source,
                    },
                );
            }
        };

        match wait_result {
            Ok(status) if status.success() => ExecOutcome::success(stdout),
            Ok(status) => ExecOutcome::failure(
                stdout,
                ExecError::Failed {
                    script: request.script_path.clone(),
                    code: status.code(),
                },
            ),
            Err(source) => ExecOutcome::failure(
                stdout,
                ExecError::Wait {
                    script: request.script_path.clone(),
                    source,
                },
            ),
        }
    }
}

/// Normalize one line of Dagger stderr for the log file.
///
/// Returns `None` for lines that carry nothing once decorations are gone.
pub fn clean_stderr_line(line: &str) -> Option<String> {
    let stripped = strip_ansi_escapes::strip_str(line);
    let trimmed = stripped.trim();
    if trimmed.is_empty() || trimmed.contains(INTERACTIVE_FOOTER_MARKER) {
        return None;
    }
    Some(trimmed.to_owned())
}
