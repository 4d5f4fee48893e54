//! 外部进程封装：捕获输出、检查退出码、可选超时。

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} exited with {code:?}: {diagnostics}")]
    Failed {
        program: String,
        code: Option<i32>,
        diagnostics: String,
    },
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// `None` waits for the process indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// 运行进程；非零退出码视为失败并携带诊断输出。
    pub async fn run(self) -> Result<ProcessOutput, ProcessError> {
        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(program, args = ?self.args, "spawn external process");

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| ProcessError::TimedOut {
                    program: program.clone(),
                    timeout,
                })?,
            None => cmd.output().await,
        }
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let output = ProcessOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.status.success() {
            return Err(ProcessError::Failed {
                program,
                code: output.status.code(),
                diagnostics: output.diagnostics(),
            });
        }
        Ok(output)
    }
}

impl ProcessOutput {
    /// stderr when present, otherwise stdout.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}
