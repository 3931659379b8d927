//! ABOUTME: Executor running dispatched jobs under a distributed lock
//! ABOUTME: Cancellable shell command lifecycle with combined output capture

use chrono::Utc;
use cw_core::{ExecError, ExecuteInfo, ExecuteResult};
use cw_sched::Dispatch;
use etcd_client::Client;
use std::process::Stdio;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod lock;

pub use lock::JobLock;

/// Runs dispatched jobs, one task per execution.
///
/// Every dispatch delivers exactly one result back to the scheduler, even
/// when the lock is lost or the command cannot be spawned.
pub struct Executor {
    client: Client,
    lock_ttl_secs: i64,
}

impl Executor {
    pub fn new(client: Client, lock_ttl_secs: i64) -> Self {
        Self {
            client,
            lock_ttl_secs,
        }
    }
}

impl Dispatch for Executor {
    fn dispatch(&self, info: ExecuteInfo, results: mpsc::Sender<ExecuteResult>) {
        let client = self.client.clone();
        let ttl = self.lock_ttl_secs;
        tokio::spawn(async move {
            let result = execute(client, ttl, info).await;
            let _ = results.send(result).await;
        });
    }
}

/// Acquire the per-job lock, run the command, release, report.
async fn execute(client: Client, lock_ttl_secs: i64, info: ExecuteInfo) -> ExecuteResult {
    let mut lock = JobLock::new(client, &info.job.name, lock_ttl_secs);

    if let Err(err) = lock.try_lock().await {
        let now = Utc::now();
        return ExecuteResult {
            info,
            output: Vec::new(),
            err: Some(err),
            start_time: now,
            end_time: now,
        };
    }

    let start_time = Utc::now();
    debug!(job = %info.job.name, "command starting");
    let (output, err) = run_command(&info.job.command, &info.cancel).await;
    let end_time = Utc::now();

    lock.unlock().await;

    ExecuteResult {
        info,
        output,
        err,
        start_time,
        end_time,
    }
}

/// Run `sh -c <command>`, racing completion against the cancel token.
///
/// The child is killed when the token fires (the output future is dropped
/// with kill-on-drop set). Captured bytes are stdout followed by stderr.
pub async fn run_command(
    command: &str,
    cancel: &CancellationToken,
) -> (Vec<u8>, Option<ExecError>) {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tokio::select! {
        result = cmd.output() => match result {
            Ok(output) => {
                let mut bytes = output.stdout;
                bytes.extend_from_slice(&output.stderr);
                let err = if output.status.success() {
                    None
                } else if let Some(code) = output.status.code() {
                    Some(ExecError::NonZero(code))
                } else {
                    Some(ExecError::Signalled)
                };
                (bytes, err)
            }
            Err(e) => (Vec::new(), Some(ExecError::Spawn(e.to_string()))),
        },
        _ = cancel.cancelled() => (Vec::new(), Some(ExecError::Cancelled)),
    }
}
