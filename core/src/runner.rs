//! Child-process runner for external analyzers.
//!
//! Every tool runs inside its request's workspace with a hard wall-clock
//! limit. Output is captured up to a byte budget; the rest is drained and
//! dropped so a chatty tool can never block on a full pipe.

use crate::report::ToolKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// How long to keep draining pipes after the child exited. Covers the case
/// where a descendant left the tool's process group and still holds the pipe.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved command line for one tool.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

/// What a finished child process left behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub duration: Duration,
}

#[derive(Error, Debug)]
pub enum ToolFailure {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[instrument(skip_all, fields(tool = %invocation.tool, program = %invocation.program))]
pub async fn run(
    invocation: &ToolInvocation,
    output_limit: usize,
) -> Result<ProcessOutput, ToolFailure> {
    let start = Instant::now();

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // 工具及其派生的所有进程放进独立的进程组，结束时整组 kill
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ToolFailure::Launch {
        program: invocation.program.clone(),
        source,
    })?;
    // 请求级超时导致 future 被 drop 时也会整组清理
    let mut group = ProcessGroup::new(child.id());

    debug!("Spawned {} {:?}", invocation.program, invocation.args);

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(capture(s, output_limit)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(capture(s, output_limit)));

    let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            group.kill();
            abort(stdout_task);
            abort(stderr_task);
            return Err(ToolFailure::Io(e));
        }
        Err(_) => {
            warn!(
                "{} exceeded {}s, killing process",
                invocation.tool,
                invocation.timeout.as_secs()
            );
            group.kill();
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", invocation.program, e);
            }
            abort(stdout_task);
            abort(stderr_task);
            return Err(ToolFailure::Timeout(invocation.timeout));
        }
    };

    // 工具已退出，残留的后台进程不允许继续占用管道或资源
    group.kill();

    let (stdout, stdout_truncated) = collect(stdout_task).await;
    let (stderr, stderr_truncated) = collect(stderr_task).await;

    let output = ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
        duration: start.elapsed(),
    };

    debug!(
        "{} exited with {:?} in {:?}",
        invocation.tool, output.exit_code, output.duration
    );
    Ok(output)
}

/// Owns the process group of a spawned tool and SIGKILLs it at most once.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg takes no pointers; an already empty group yields ESRCH.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

async fn capture<R>(mut reader: R, limit: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    kept.extend_from_slice(&buf[..room]);
                    truncated = true;
                } else {
                    kept.extend_from_slice(&buf[..n]);
                }
            }
        }
    }

    (kept, truncated)
}

async fn collect(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (String, bool) {
    let Some(mut task) = task else {
        return (String::new(), false);
    };

    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            (String::new(), false)
        }
        Err(_) => {
            warn!("Output pipe still open after exit, dropping remaining output");
            task.abort();
            (String::new(), true)
        }
    }
}

fn abort(task: Option<JoinHandle<(Vec<u8>, bool)>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shell(script: &str, dir: &std::path::Path, timeout: Duration) -> ToolInvocation {
        ToolInvocation {
            tool: ToolKind::Quality,
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
            timeout,
        }
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let dir = tempdir().unwrap();
        let invocation = shell("echo out; echo err >&2; exit 3", dir.path(), Duration::from_secs(5));

        let output = run(&invocation, 1024).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn runs_inside_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("code_under_test.py"), "x = 1\n").unwrap();
        let invocation = shell("cat code_under_test.py", dir.path(), Duration::from_secs(5));

        let output = run(&invocation, 1024).await.unwrap();
        assert_eq!(output.stdout, "x = 1\n");
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let dir = tempdir().unwrap();
        let invocation = ToolInvocation {
            tool: ToolKind::Security,
            program: "codecheck-no-such-binary".to_string(),
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(5),
        };

        let err = run(&invocation, 1024).await.unwrap_err();
        assert!(matches!(err, ToolFailure::Launch { .. }));
    }

    #[tokio::test]
    async fn slow_process_is_killed() {
        let dir = tempdir().unwrap();
        let invocation = shell("sleep 30", dir.path(), Duration::from_millis(300));

        let start = Instant::now();
        let err = run(&invocation, 1024).await.unwrap_err();
        assert!(matches!(err, ToolFailure::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timeout_kills_background_children() {
        let dir = tempdir().unwrap();
        let invocation = shell(
            "(sleep 2; touch leaked) & sleep 30",
            dir.path(),
            Duration::from_millis(500),
        );

        let err = run(&invocation, 1024).await.unwrap_err();
        assert!(matches!(err, ToolFailure::Timeout(_)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!dir.path().join("leaked").exists());
    }

    #[tokio::test]
    async fn background_children_do_not_outlive_the_tool() {
        let dir = tempdir().unwrap();
        let invocation = shell(
            "(sleep 1; touch leaked) & echo done",
            dir.path(),
            Duration::from_secs(5),
        );

        let start = Instant::now();
        let output = run(&invocation, 1024).await.unwrap();
        assert_eq!(output.stdout.trim(), "done");
        assert!(start.elapsed() < DRAIN_GRACE);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.path().join("leaked").exists());
    }

    #[tokio::test]
    async fn dropped_run_kills_process_group() {
        let dir = tempdir().unwrap();
        let invocation = shell(
            "(sleep 2; touch leaked) & sleep 30",
            dir.path(),
            Duration::from_secs(30),
        );

        let cancelled = tokio::time::timeout(Duration::from_millis(500), run(&invocation, 1024)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!dir.path().join("leaked").exists());
    }

    #[tokio::test]
    async fn output_beyond_limit_is_dropped() {
        let dir = tempdir().unwrap();
        let invocation = shell(
            "i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done",
            dir.path(),
            Duration::from_secs(10),
        );

        let output = run(&invocation, 1000).await.unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.len(), 1000);
        assert!(output.truncated);
    }
}
