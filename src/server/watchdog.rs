//! Process supervision for externally-invoked commands (spec §4.8 "Process
//! supervision of external commands"): stdout+stderr are combined into a
//! rolling buffer; a tick fires every `idle_timeout` and `SIGKILL`s the
//! child if the buffer hasn't grown since the previous tick. Grounded on
//! the teacher's subprocess plumbing in `git.rs` (combined output capture)
//! and `semantic_search/qdrant_process.rs` (supervising a long-lived
//! external binary), generalized to a reusable kill-on-silence primitive
//! shared by every external command C8 runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::Mutex;

/// Default no-output-for interval before a child is killed (spec §4.8).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("no output for {0:?}")]
    Silent(Duration),
    #[error("child exited with status {status}: {combined_output}")]
    NonZeroExit { status: i32, combined_output: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs `child` to completion, killing it if its combined stdout+stderr
/// stops growing for `idle_timeout`. Returns the combined output on success
/// (matching spec's "on any non-zero exit, the combined output is returned
/// in the error for operator logs").
pub async fn run_supervised(mut child: Child, idle_timeout: Duration) -> Result<Vec<u8>, WatchdogError> {
    let buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut readers = tokio::task::JoinSet::new();
    if let Some(stdout) = stdout {
        readers.spawn(pump(stdout, Arc::clone(&buffer)));
    }
    if let Some(stderr) = stderr {
        readers.spawn(pump(stderr, Arc::clone(&buffer)));
    }

    let watch_buffer = Arc::clone(&buffer);
    let pid = child.id();
    let watchdog = tokio::spawn(async move {
        let mut last_len = 0usize;
        loop {
            tokio::time::sleep(idle_timeout).await;
            let current_len = watch_buffer.lock().await.len();
            if current_len == last_len {
                if let Some(pid) = pid {
                    kill_pid(pid);
                }
                return true;
            }
            last_len = current_len;
        }
    });

    let wait_result = child.wait().await;
    watchdog.abort();
    while readers.join_next().await.is_some() {}

    let status = wait_result?;
    let combined_output = buffer.lock().await.clone();

    if !status.success() {
        return Err(WatchdogError::NonZeroExit {
            status: status.code().unwrap_or(-1),
            combined_output: String::from_utf8_lossy(&combined_output).into_owned(),
        });
    }

    Ok(combined_output)
}

async fn pump(mut reader: impl AsyncRead + Unpin, buffer: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
        }
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn successful_child_returns_combined_output() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("echo hello")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let output = run_supervised(child, Duration::from_secs(5)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output).trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_combined_output_in_the_error() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let err = run_supervised(child, Duration::from_secs(5)).await.unwrap_err();
        match err {
            WatchdogError::NonZeroExit { status, combined_output } => {
                assert_eq!(status, 3);
                assert!(combined_output.contains("oops"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_child_is_killed_after_idle_timeout() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let result = run_supervised(child, Duration::from_millis(50)).await;
        // Killed child exits with a non-zero/signal status, surfaced as NonZeroExit.
        assert!(result.is_err());
    }
}
