//! ABOUTME: Coordination store key space shared between master and workers
//! ABOUTME: Prefix constants and exact prefix-strip name extraction

/// Job definitions live under this prefix, one key per job name.
pub const JOBS_PREFIX: &str = "/cron/jobs/";

/// Transient kill signals, written with a very short lease.
pub const KILLER_PREFIX: &str = "/cron/killer/";

/// Transient run-once signals.
pub const ONCE_PREFIX: &str = "/cron/once/";

/// Per-job execution locks, created via CAS on create-revision == 0.
pub const LOCK_PREFIX: &str = "/cron/lock/";

/// Worker liveness keys, one leased key per worker IP.
pub const WORKERS_PREFIX: &str = "/cron/workers/";

pub fn job_key(name: &str) -> String {
    format!("{JOBS_PREFIX}{name}")
}

pub fn killer_key(name: &str) -> String {
    format!("{KILLER_PREFIX}{name}")
}

pub fn once_key(name: &str) -> String {
    format!("{ONCE_PREFIX}{name}")
}

pub fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}{name}")
}

pub fn worker_key(ip: &str) -> String {
    format!("{WORKERS_PREFIX}{ip}")
}

/// Extract the job name from a jobs-prefix key.
pub fn job_name(key: &str) -> &str {
    key.strip_prefix(JOBS_PREFIX).unwrap_or(key)
}

/// Extract the job name from a killer-prefix key.
pub fn killer_name(key: &str) -> &str {
    key.strip_prefix(KILLER_PREFIX).unwrap_or(key)
}

/// Extract the job name from a once-prefix key.
pub fn once_name(key: &str) -> &str {
    key.strip_prefix(ONCE_PREFIX).unwrap_or(key)
}

/// Extract the worker IP from a workers-prefix key.
pub fn worker_ip(key: &str) -> &str {
    key.strip_prefix(WORKERS_PREFIX).unwrap_or(key)
}
