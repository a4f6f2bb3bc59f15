use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{kill_group, CommandSpec};
use crate::error::{ExecError, Result};

/// How long to wait for a killed group to release its pipes.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// How long output is still read after the child exits. Background
/// processes that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// How a child run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// Non-zero exit status, or waiting on the child failed.
    Failed(String),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub exit: Exit,
    /// Wall-clock time from spawn until the run was decided.
    pub elapsed: Duration,
}

/// Spawn `spec` and drive it to completion.
///
/// Every stdout and stderr line is handed to `sink` as it arrives (without
/// the trailing newline, invalid UTF-8 replaced). The run is decided by
/// whichever comes first: process exit, `timeout`, or `cancel`. Output
/// still buffered when the child exits is read for a short grace period;
/// pipes held open by background descendants are then dropped. On timeout
/// or cancellation the whole process group is killed before returning.
///
/// # Errors
///
/// `ExecError::Spawn` / `ExecError::EmptyCommand` when the child could not be
/// started. Failures after spawn are reported through [`Exit`].
pub async fn run<F>(
    spec: &CommandSpec,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    mut sink: F,
) -> Result<Finished>
where
    F: FnMut(&str),
{
    if cancel.is_cancelled() {
        return Ok(Finished {
            exit: Exit::Cancelled,
            elapsed: Duration::ZERO,
        });
    }

    let mut child = spec
        .build()?
        .spawn()
        .map_err(|e| ExecError::Spawn(e.to_string()))?;
    let started = Instant::now();
    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Spawn("stdout not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Spawn("stderr not piped".to_string()))?;
    debug!(?pid, command = %spec.command, "child spawned");

    let work = async {
        let pump = pump_lines(stdout, stderr, &mut sink);
        tokio::pin!(pump);
        let mut drained = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = &mut pump, if !drained => drained = true,
            }
        };
        if !drained && tokio::time::timeout(DRAIN_GRACE, &mut pump).await.is_err() {
            debug!(?pid, "output still open after exit; readers detached");
        }
        status
    };
    tokio::pin!(work);

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let exit = tokio::select! {
        status = &mut work => match status {
            Ok(status) if status.success() => Exit::Success,
            Ok(status) => Exit::Failed(status.to_string()),
            Err(e) => Exit::Failed(format!("wait failed: {e}")),
        },
        _ = deadline => Exit::TimedOut,
        _ = cancel.cancelled() => Exit::Cancelled,
    };
    let elapsed = started.elapsed();

    if matches!(exit, Exit::TimedOut | Exit::Cancelled) {
        if let Some(pid) = pid {
            kill_group(pid);
        }
        if tokio::time::timeout(REAP_GRACE, &mut work).await.is_err() {
            warn!(?pid, "killed child did not exit within grace period");
        }
    }

    Ok(Finished { exit, elapsed })
}

/// Forward lines from both pipes to `sink` until both reach EOF.
async fn pump_lines<O, E, F>(stdout: O, stderr: E, sink: &mut F)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut out = BufReader::new(stdout);
    let mut err = BufReader::new(stderr);
    let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            line = read_line(&mut out, &mut out_buf), if out_open => match line {
                Ok(Some(line)) => sink(&line),
                Ok(None) => out_open = false,
                Err(e) => {
                    debug!(error = %e, "stdout read failed");
                    out_open = false;
                }
            },
            line = read_line(&mut err, &mut err_buf), if err_open => match line {
                Ok(Some(line)) => sink(&line),
                Ok(None) => err_open = false,
                Err(e) => {
                    debug!(error = %e, "stderr read failed");
                    err_open = false;
                }
            },
        }
    }
}

/// Next complete line, or the unterminated tail at EOF.
///
/// Partial reads survive cancellation in `buf`.
async fn read_line<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 && buf.is_empty() {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Ok(Some(line))
}
