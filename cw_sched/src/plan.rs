//! ABOUTME: Schedule plans pairing a job with its parsed cron expression
//! ABOUTME: Next-fire computation and activation window admission

use chrono::{DateTime, Utc};
use cron::Schedule;
use cw_core::time::parse_local;
use cw_core::{Error, Job, Result};
use std::str::FromStr;
use tracing::warn;

/// A job admitted to the scheduler, with its parsed expression and the
/// next instant it should fire.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub job: Job,
    pub schedule: Schedule,
    pub next_time: DateTime<Utc>,
}

impl SchedulePlan {
    /// Parse the job's cron expression and seed the first fire time.
    pub fn build(job: Job, now: DateTime<Utc>) -> Result<Self> {
        let schedule = Schedule::from_str(&job.cron_expr).map_err(|e| {
            Error::Parse(format!(
                "invalid cron expression '{}' for job '{}': {}",
                job.cron_expr, job.name, e
            ))
        })?;
        let next_time = schedule.after(&now).next().ok_or_else(|| {
            Error::Parse(format!(
                "cron expression '{}' for job '{}' has no upcoming fire",
                job.cron_expr, job.name
            ))
        })?;
        Ok(Self {
            job,
            schedule,
            next_time,
        })
    }

    /// Advance past `now`; the new fire time is strictly in the future.
    ///
    /// Returns false when the expression has no further fire (year-bounded
    /// schedules run out), in which case the plan should be retired.
    pub fn advance(&mut self, now: DateTime<Utc>) -> bool {
        match self.schedule.after(&now).next() {
            Some(next) => {
                self.next_time = next;
                true
            }
            None => false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_time <= now
    }

    /// Whether `now` falls inside the job's activation window.
    ///
    /// Empty bounds are open; a malformed bound is logged and treated as
    /// absent rather than blocking the job.
    pub fn window_admits(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = parse_bound(&self.job.name, "startTime", &self.job.start_time) {
            if now < start {
                return false;
            }
        }
        if let Some(stop) = parse_bound(&self.job.name, "stopTime", &self.job.stop_time) {
            if now > stop {
                return false;
            }
        }
        true
    }
}

fn parse_bound(job: &str, field: &str, value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    let parsed = parse_local(value);
    if parsed.is_none() {
        warn!(job, field, value, "unparsable window bound, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cw_core::time::LOCAL_TIME_FORMAT;

    fn job(cron_expr: &str) -> Job {
        Job {
            name: "hello".into(),
            command: "echo hi".into(),
            cron_expr: cron_expr.into(),
            email: "a@b.c".into(),
            ..Job::default()
        }
    }

    #[test]
    fn test_build_rejects_bad_expression() {
        assert!(SchedulePlan::build(job("not a cron"), Utc::now()).is_err());
        assert!(SchedulePlan::build(job(""), Utc::now()).is_err());
    }

    #[test]
    fn test_build_seeds_future_fire() {
        let now = Utc::now();
        let plan = SchedulePlan::build(job("*/1 * * * * *"), now).unwrap();
        assert!(plan.next_time > now);
        assert!(plan.next_time <= now + Duration::seconds(2));
    }

    #[test]
    fn test_advance_is_strictly_monotone() {
        let now = Utc::now();
        let mut plan = SchedulePlan::build(job("*/1 * * * * *"), now).unwrap();
        let later = now + Duration::seconds(30);
        assert!(plan.advance(later));
        assert!(plan.next_time > later);
    }

    #[test]
    fn test_window_open_when_bounds_empty() {
        let plan = SchedulePlan::build(job("*/1 * * * * *"), Utc::now()).unwrap();
        assert!(plan.window_admits(Utc::now()));
    }

    #[test]
    fn test_window_excludes_before_start() {
        let mut j = job("*/1 * * * * *");
        let start = chrono::Local::now() + Duration::hours(1);
        j.start_time = start.format(LOCAL_TIME_FORMAT).to_string();
        let plan = SchedulePlan::build(j, Utc::now()).unwrap();
        assert!(!plan.window_admits(Utc::now()));
    }

    #[test]
    fn test_window_excludes_after_stop() {
        let mut j = job("*/1 * * * * *");
        let stop = chrono::Local::now() - Duration::hours(1);
        j.stop_time = stop.format(LOCAL_TIME_FORMAT).to_string();
        let plan = SchedulePlan::build(j, Utc::now()).unwrap();
        assert!(!plan.window_admits(Utc::now()));
    }

    #[test]
    fn test_window_malformed_bound_is_open() {
        let mut j = job("*/1 * * * * *");
        j.start_time = "soon".into();
        let plan = SchedulePlan::build(j, Utc::now()).unwrap();
        assert!(plan.window_admits(Utc::now()));
    }
}
