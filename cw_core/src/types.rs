//! ABOUTME: Domain types shared across the worker pipeline
//! ABOUTME: Job catalog entries, scheduler events, execution records, and log documents

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use crate::time::unix_millis;

/// A job definition as stored under the jobs prefix.
///
/// `start_time` and `stop_time` bound the optional activation window and
/// are local-time strings (`YYYY-MM-DD HH:MM:SS`) or empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub name: String,
    pub command: String,
    pub cron_expr: String,
    pub email: String,
    pub start_time: String,
    pub stop_time: String,
    pub details: String,
}

/// Typed change-feed event consumed by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job was created or updated.
    Save(Job),
    /// A job was removed from the catalog.
    Delete(String),
    /// A running execution of the named job must be cancelled.
    Kill(String),
    /// The named job must be dispatched immediately, outside its schedule.
    Once(String),
}

/// Terminal outcome classification for one execution attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("lock already held by another worker")]
    LockBusy,

    #[error("coordination store error: {0}")]
    Store(String),

    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("command exited with status {0}")]
    NonZero(i32),

    #[error("command terminated by signal")]
    Signalled,

    #[error("execution cancelled")]
    Cancelled,
}

/// One dispatched execution of a job.
#[derive(Debug, Clone)]
pub struct ExecuteInfo {
    pub job: Job,
    /// The fire instant the schedule called for.
    pub plan_time: DateTime<Utc>,
    /// The instant the scheduler actually dispatched.
    pub real_time: DateTime<Utc>,
    /// Cancelling this token aborts the running command.
    pub cancel: CancellationToken,
}

impl ExecuteInfo {
    pub fn new(job: Job, plan_time: DateTime<Utc>) -> Self {
        Self {
            job,
            plan_time,
            real_time: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of one execution attempt, always delivered back to the scheduler.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub info: ExecuteInfo,
    /// Combined stdout + stderr bytes.
    pub output: Vec<u8>,
    pub err: Option<ExecError>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Execution record persisted to the log store.
///
/// Field names are the wire contract of the `cron.log` collection; all
/// times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    pub job_name: String,
    pub command: String,
    pub err: String,
    pub output: String,
    pub plan_time: i64,
    pub schedule_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    pub email: String,
}

impl JobLog {
    /// Build the persisted record for a finished execution.
    pub fn from_result(result: &ExecuteResult, local_ip: &str) -> Self {
        Self {
            job_name: result.info.job.name.clone(),
            command: result.info.job.command.clone(),
            err: result
                .err
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            output: String::from_utf8_lossy(&result.output).into_owned(),
            plan_time: unix_millis(result.info.plan_time),
            schedule_time: unix_millis(result.info.real_time),
            start_time: unix_millis(result.start_time),
            end_time: unix_millis(result.end_time),
            local_ip: local_ip.to_string(),
            email: result.info.job.email.clone(),
        }
    }
}

/// Check that an alert address is plausibly deliverable before handing it
/// to the mail transport.
pub fn is_valid_email(addr: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^\w+([-+.]\w+)*@\w+([-.]\w+)*\.\w+([-.]\w+)*$").expect("static pattern parses")
    });
    re.is_match(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_job() -> Job {
        Job {
            name: "hello".into(),
            command: "echo hi".into(),
            cron_expr: "*/1 * * * * *".into(),
            email: "a@b.c".into(),
            start_time: String::new(),
            stop_time: String::new(),
            details: "d".into(),
        }
    }

    #[test]
    fn test_job_json_field_names() {
        let json = serde_json::to_value(sample_job()).unwrap();
        let obj = json.as_object().unwrap();
        for field in [
            "name",
            "command",
            "cronExpr",
            "email",
            "startTime",
            "stopTime",
            "details",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn test_job_deserializes_with_missing_optional_fields() {
        let job: Job = serde_json::from_str(
            r#"{"name":"hello","command":"echo hi","cronExpr":"*/1 * * * * *","email":"a@b.c"}"#,
        )
        .unwrap();
        assert_eq!(job.name, "hello");
        assert!(job.start_time.is_empty());
        assert!(job.details.is_empty());
    }

    #[test]
    fn test_job_log_field_names() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let result = ExecuteResult {
            info: ExecuteInfo::new(sample_job(), t),
            output: b"hi\n".to_vec(),
            err: None,
            start_time: t,
            end_time: t,
        };
        let log = JobLog::from_result(&result, "192.168.1.2");
        let json = serde_json::to_value(&log).unwrap();
        let obj = json.as_object().unwrap();
        for field in [
            "jobName",
            "command",
            "err",
            "output",
            "planTime",
            "scheduleTime",
            "startTime",
            "endTime",
            "localIP",
            "email",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(obj["planTime"].as_i64().unwrap(), t.timestamp_millis());
        assert_eq!(obj["output"].as_str().unwrap(), "hi\n");
        assert_eq!(obj["err"].as_str().unwrap(), "");
    }

    #[test]
    fn test_job_log_captures_error_string() {
        let t = Utc::now();
        let result = ExecuteResult {
            info: ExecuteInfo::new(sample_job(), t),
            output: Vec::new(),
            err: Some(ExecError::NonZero(3)),
            start_time: t,
            end_time: t,
        };
        let log = JobLog::from_result(&result, "10.0.0.1");
        assert_eq!(log.err, "command exited with status 3");
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("ops@example.com"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("not-an-address"));
        assert!(!is_valid_email("missing@tld"));
    }
}
