//! Shared subprocess management.
//!
//! [`run_command`] holds the spawn + I/O + wait logic. Callers configure the
//! program and arguments on a [`tokio::process::Command`] and delegate here.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::executor::{ExecError, ProcessOutput};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this is discarded; search output itself goes to a file,
/// so only diagnostics flow through these pipes.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Exit code reported when the platform gives neither a code nor a signal.
const UNKNOWN_EXIT_CODE: i32 = 255;

/// Spawn `cmd`, capture stdout/stderr, and wait for it to exit.
///
/// The wait races `cancel`. When the token fires first the child is killed
/// and [`ExecError::Interrupted`] is returned.
pub async fn run_command(
    cmd: &mut Command,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ExecError> {
    // `kill_on_drop(true)` guarantees the child does not outlive this call.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn()?;

    // Read both pipes in spawned tasks so `child.wait()` can borrow the child.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill interrupted process");
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(ExecError::Interrupted {
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: exit_code(status),
        duration_ms,
    })
}

/// Exit code, using the shell's `128 + signal` convention for signalled
/// children.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}
