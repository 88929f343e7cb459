//! # Process Capture Module / 进程捕获模块
//!
//! Spawning of test-runner child processes with full output capture.
//! Each stream gets its own dedicated reader task that runs to stream end,
//! so one chatty module can never starve the capture of another.
//!
//! 派生测试运行器子进程并完整捕获其输出。
//! 每个流都有自己专用的读取任务，一直运行到流结束，
//! 因此一个多话的模块永远不会饿死另一个模块的捕获。

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

/// Everything a finished child left behind: the lines of both streams,
/// kept apart because failure reports attribute them separately.
/// 已结束子进程留下的一切：两个流的行，分开保存，
/// 因为失败报告会分别归属它们。
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Spawns a command and captures stdout and stderr to completion.
///
/// The returned status is only produced after the child exited *and* both
/// reader tasks drained their stream, which is the completion condition the
/// session layer relies on before it validates bookkeeping.
///
/// # Arguments
/// * `cmd` - The `tokio::process::Command` to execute.
///
/// # Returns
/// A tuple containing:
/// - The `ExitStatus` of the process wrapped in an `io::Result`.
/// - The captured output of both streams.
///
/// 派生一个命令，捕获其 stdout 和 stderr 直至完成。
/// 只有在子进程退出且两个读取任务都排空其流之后才返回状态，
/// 这是会话层在校验记账之前依赖的完成条件。
pub async fn spawn_and_capture(
    mut cmd: tokio::process::Command,
) -> (std::io::Result<std::process::ExitStatus>, CapturedOutput) {
    let mut child = match cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            // If spawning fails, we return the error and empty output.
            // 如果派生失败，我们返回错误和空输出。
            return (Err(e), CapturedOutput::default());
        }
    };

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            return (
                Err(std::io::Error::other("failed to capture child stdout")),
                CapturedOutput::default(),
            );
        }
    };
    let stderr = match child.stderr.take() {
        Some(stderr) => stderr,
        None => {
            return (
                Err(std::io::Error::other("failed to capture child stderr")),
                CapturedOutput::default(),
            );
        }
    };

    let stdout_lines = Arc::new(Mutex::new(Vec::new()));
    let stderr_lines = Arc::new(Mutex::new(Vec::new()));

    // Dedicated reader per stream, reading to stream end.
    // 每个流一个专用读取器，读取至流结束。
    let stdout_sink = Arc::clone(&stdout_lines);
    let stdout_handle = tokio::spawn(async move {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            stdout_sink.lock().await.push(line);
        }
    });

    let stderr_sink = Arc::clone(&stderr_lines);
    let stderr_handle = tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            stderr_sink.lock().await.push(line);
        }
    });

    // Wait for the process to exit.
    // 等待进程退出。
    let status = child.wait().await;

    // Join both readers so every line is accounted for before returning.
    // 汇合两个读取器，确保返回前每一行都已被记录。
    if let Err(e) = stdout_handle.await {
        tracing::warn!("failed to join stdout reader task: {e}");
    }
    if let Err(e) = stderr_handle.await {
        tracing::warn!("failed to join stderr reader task: {e}");
    }

    let captured = CapturedOutput {
        stdout: std::mem::take(&mut *stdout_lines.lock().await),
        stderr: std::mem::take(&mut *stderr_lines.lock().await),
    };

    (status, captured)
}
