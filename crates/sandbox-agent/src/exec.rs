//! Command execution under a shell.
//!
//! Each call spawns a fresh process group so a timeout can terminate the
//! whole descendant tree, not just the shell. Escalation is
//! terminate-then-kill with a short grace window; the signal is sent via
//! the `kill` utility rather than a direct syscall, the same pattern other
//! exec implementations use to avoid a libc dependency for one signal.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use sandbox_core::config::KILL_GRACE_WINDOW;
use sandbox_core::error::{AgentError, AgentResult};
use sandbox_core::session::ExecChunk;
use sandbox_core::session::ExecResult;

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

/// Chunk flush boundary for streaming exec: whichever comes first, a
/// newline or this many buffered bytes.
const STREAM_FLUSH_BYTES: usize = 8192;

fn spawn_shell(command: &str, workdir: &Path) -> std::io::Result<Child> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd.spawn()
}

async fn kill_process_group(pid: u32, signal: i32) {
    let _ = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

/// Runs the escalation on a still-running child, returning the exit code
/// convention to report: `128 + signal` for whichever signal finally
/// terminated it.
async fn escalate(mut child: Child, pid: Option<u32>) -> i32 {
    let Some(pid) = pid else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return 128 + SIGKILL;
    };

    kill_process_group(pid, SIGTERM).await;
    match tokio::time::timeout(KILL_GRACE_WINDOW, child.wait()).await {
        Ok(Ok(status)) => status.code().unwrap_or(128 + SIGTERM),
        _ => {
            kill_process_group(pid, SIGKILL).await;
            let _ = child.wait().await;
            128 + SIGKILL
        }
    }
}

/// `POST /exec`: runs `command`, buffering complete stdout/stderr.
pub async fn run(command: &str, workdir: &Path, timeout: Duration) -> AgentResult<ExecResult> {
    let mut child = spawn_shell(command, workdir)?;
    let pid = child.id();

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(ExecResult {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(AgentError::ExecutionFailed(e.to_string())),
        Err(_) => {
            let exit_code = escalate(child, pid).await;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(ExecResult {
                exit_code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                timed_out: true,
            })
        }
    }
}

/// `POST /exec_stream`: same semantics as `run`, but chunks are emitted as
/// they arrive through the returned channel, terminated by an `Exit` chunk.
pub async fn run_stream(
    command: &str,
    workdir: &Path,
    timeout: Duration,
) -> AgentResult<mpsc::Receiver<ExecChunk>> {
    let mut child = spawn_shell(command, workdir)?;
    let pid = child.id();

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = mpsc::channel::<ExecChunk>(256);

    let tx_out = tx.clone();
    tokio::spawn(pump(stdout, tx_out, |data| ExecChunk::Stdout { data }));
    let tx_err = tx.clone();
    tokio::spawn(pump(stderr, tx_err, |data| ExecChunk::Stderr { data }));

    tokio::spawn(async move {
        let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(_)) => -1,
            Err(_) => escalate(child, pid).await,
        };
        let _ = tx.send(ExecChunk::Exit { exit_code }).await;
    });

    Ok(rx)
}

async fn pump<R, F>(mut reader: R, tx: mpsc::Sender<ExecChunk>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> ExecChunk,
{
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        let n = match reader.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        buf.extend_from_slice(&scratch[..n]);

        loop {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if tx.send(wrap(String::from_utf8_lossy(&line).into_owned())).await.is_err() {
                    return;
                }
            } else if buf.len() >= STREAM_FLUSH_BYTES {
                let data: Vec<u8> = buf.drain(..).collect();
                if tx.send(wrap(String::from_utf8_lossy(&data).into_owned())).await.is_err() {
                    return;
                }
            } else {
                break;
            }
        }
    }
    if !buf.is_empty() {
        let _ = tx.send(wrap(String::from_utf8_lossy(&buf).into_owned())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn echo_succeeds_with_exit_zero() {
        let result = run("echo hello", &cwd(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_without_error() {
        let result = run("exit 7", &cwd(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit_code, 7);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn stderr_is_captured_independently() {
        let result = run("echo out; echo err 1>&2", &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn long_running_command_is_killed_on_timeout() {
        let start = tokio::time::Instant::now();
        let result = run("sleep 60", &cwd(), Duration::from_secs(1)).await.unwrap();
        assert!(result.timed_out);
        assert_ne!(result.exit_code, 0);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stream_emits_exit_chunk_last() {
        let mut rx = run_stream("echo hi", &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            let is_exit = matches!(chunk, ExecChunk::Exit { .. });
            chunks.push(chunk);
            if is_exit {
                break;
            }
        }
        assert!(matches!(chunks.last(), Some(ExecChunk::Exit { exit_code: 0 })));
        assert!(chunks
            .iter()
            .any(|c| matches!(c, ExecChunk::Stdout { data } if data.contains("hi"))));
    }

    #[tokio::test]
    async fn stream_timeout_still_terminates_with_exit_chunk() {
        let mut rx = run_stream("sleep 60", &cwd(), Duration::from_secs(1))
            .await
            .unwrap();
        let mut saw_exit = false;
        while let Some(chunk) = rx.recv().await {
            if let ExecChunk::Exit { exit_code } = chunk {
                assert_ne!(exit_code, 0);
                saw_exit = true;
            }
        }
        assert!(saw_exit);
    }
}
