//! Shell execution for the `shell_run` tool: spawn via the host shell with
//! the workspace root as CWD, drain stdout/stderr with byte and line caps,
//! enforce the tool timeout, and honor cooperative cancellation with a
//! SIGTERM-then-SIGKILL grace window.

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CoreErr;
use crate::error::Result;

// Maximum we keep for each stream before the event-level character cap even
// applies, so a chatty command cannot balloon memory.
const MAX_STREAM_OUTPUT: usize = 64 * 1024;
const MAX_STREAM_OUTPUT_LINES: usize = 1024;

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// How long a cancelled command gets to exit after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ExecParams {
    /// Passed verbatim to `sh -c`.
    pub command: String,
    pub cwd: PathBuf,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

pub async fn run_shell(params: ExecParams, cancel: &CancellationToken) -> Result<ExecOutcome> {
    let timeout_ms = params
        .timeout_ms
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .min(MAX_TIMEOUT_MS);
    let start = Instant::now();

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&params.command)
        .current_dir(&params.cwd)
        // No stdin pipe: some tools try to read from an open stdin and would
        // hang forever waiting for input.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| CoreErr::Io(io::Error::other("stdout pipe was unexpectedly not available")))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| CoreErr::Io(io::Error::other("stderr pipe was unexpectedly not available")))?;

    let stdout_handle = tokio::spawn(collect_capped(stdout_reader));
    let stderr_handle = tokio::spawn(collect_capped(stderr_reader));

    let mut timed_out = false;
    let exit_status = tokio::select! {
        result = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()) => {
            match result {
                Ok(status) => status?,
                Err(_) => {
                    timed_out = true;
                    child.start_kill()?;
                    child.wait().await?
                }
            }
        }
        _ = cancel.cancelled() => {
            terminate_gracefully(&mut child).await?;
            // Turn aborted: the partial result is discarded by the caller.
            return Err(CoreErr::Cancelled);
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_handle.await??).to_string();
    let stderr = String::from_utf8_lossy(&stderr_handle.await??).to_string();

    #[cfg(unix)]
    let signal = exit_status.signal();
    #[cfg(not(unix))]
    let signal = None;

    Ok(ExecOutcome {
        exit_code: exit_status.code().unwrap_or(-1),
        signal,
        stdout,
        stderr,
        duration_ms: start.elapsed().as_millis() as u64,
        timed_out,
    })
}

/// SIGTERM first so the child may clean up; SIGKILL once the grace window
/// elapses.
async fn terminate_gracefully(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return Ok(());
        }
    }
    child.start_kill()?;
    child.wait().await?;
    Ok(())
}

/// Bounded sink for one child stream: keeps a prefix limited both by total
/// bytes and by newline count, and silently drops whatever arrives after
/// either budget is spent.
struct CappedBuffer {
    data: Vec<u8>,
    bytes_left: usize,
    lines_left: usize,
}

impl CappedBuffer {
    fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            data: Vec::new(),
            bytes_left: max_bytes,
            lines_left: max_lines,
        }
    }

    /// Stores as much of `chunk` as the budgets still allow. The kept slice
    /// ends either at the cap boundary or just after the final permitted
    /// newline, so a line cap never strands a partial extra line.
    fn accept(&mut self, chunk: &[u8]) {
        if self.bytes_left == 0 || self.lines_left == 0 {
            return;
        }
        let window = &chunk[..chunk.len().min(self.bytes_left)];
        let mut keep = window.len();
        for (offset, byte) in window.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            self.lines_left -= 1;
            if self.lines_left == 0 {
                keep = offset + 1;
                break;
            }
        }
        self.bytes_left -= keep;
        self.data.extend_from_slice(&window[..keep]);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Reads a child stream to completion. The stream is consumed all the way to
/// EOF even once the caps are exhausted, otherwise the child could stall
/// forever against a full pipe; only the capped prefix is returned.
async fn collect_capped<R: AsyncRead + Unpin>(mut stream: R) -> io::Result<Vec<u8>> {
    let mut kept = CappedBuffer::new(MAX_STREAM_OUTPUT, MAX_STREAM_OUTPUT_LINES);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept.into_bytes());
        }
        kept.accept(&chunk[..n]);
    }
}
