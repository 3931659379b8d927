//! ABOUTME: Scheduler owning the live plan set and the cooperative main loop
//! ABOUTME: Reconciles catalog events, computes due fires, and dispatches executions

use chrono::{DateTime, Utc};
use cw_core::{ExecError, ExecuteInfo, ExecuteResult, Job, JobEvent, JobLog};
use cw_logsink::LogAppender;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod plan;

pub use plan::SchedulePlan;

/// Wait between passes while no plans are admitted.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Capacity of the execution result channel.
const RESULT_CHANNEL_CAPACITY: usize = 1000;

/// Seam between the scheduler and the executor.
///
/// An implementation starts the execution on its own task and must
/// eventually deliver exactly one [`ExecuteResult`] on `results`, whatever
/// happens (lock loss, spawn failure, or cancellation) so the scheduler
/// can clear its busy entry.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, info: ExecuteInfo, results: mpsc::Sender<ExecuteResult>);
}

/// Single-task scheduler; sole mutator of the plan set and the busy set.
pub struct Scheduler {
    plans: HashMap<String, SchedulePlan>,
    executing: HashMap<String, CancellationToken>,
    events: mpsc::Receiver<JobEvent>,
    events_open: bool,
    results: mpsc::Receiver<ExecuteResult>,
    result_tx: mpsc::Sender<ExecuteResult>,
    dispatcher: Arc<dyn Dispatch>,
    sink: LogAppender,
    local_ip: String,
}

impl Scheduler {
    pub fn new(
        events: mpsc::Receiver<JobEvent>,
        dispatcher: Arc<dyn Dispatch>,
        sink: LogAppender,
        local_ip: String,
    ) -> Self {
        let (result_tx, results) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            plans: HashMap::new(),
            executing: HashMap::new(),
            events,
            events_open: true,
            results,
            result_tx,
            dispatcher,
            sink,
            local_ip,
        }
    }

    /// Run until `shutdown` fires.
    ///
    /// Each turn waits for whichever comes first of the next fire time, a
    /// catalog event, or an execution result, then runs a scheduling pass.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("scheduler started");
        loop {
            let wait = self.next_wait(Utc::now());
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
                maybe = self.events.recv(), if self.events_open => match maybe {
                    Some(event) => self.apply_event(event),
                    None => {
                        warn!("job event channel closed");
                        self.events_open = false;
                    }
                },
                maybe = self.results.recv() => {
                    if let Some(result) = maybe {
                        self.complete(result);
                    }
                }
            }
            self.schedule_pass(Utc::now());
        }
    }

    /// Time until the soonest fire, or a fixed idle wait with no plans.
    fn next_wait(&self, now: DateTime<Utc>) -> Duration {
        match self.plans.values().map(|p| p.next_time).min() {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_WAIT,
        }
    }

    /// Apply one catalog or control event to the plan set.
    fn apply_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Save(job) => match SchedulePlan::build(job, Utc::now()) {
                Ok(plan) => {
                    debug!(job = %plan.job.name, next = %plan.next_time, "plan admitted");
                    self.plans.insert(plan.job.name.clone(), plan);
                }
                Err(e) => warn!(error = %e, "dropping save event"),
            },
            JobEvent::Delete(name) => {
                // Does not cancel a running execution.
                if self.plans.remove(&name).is_some() {
                    debug!(job = %name, "plan removed");
                }
            }
            JobEvent::Kill(name) => {
                if let Some(cancel) = self.executing.get(&name) {
                    info!(job = %name, "cancelling running execution");
                    cancel.cancel();
                }
            }
            JobEvent::Once(name) => {
                if self.executing.contains_key(&name) {
                    debug!(job = %name, "once signal ignored, already executing");
                    return;
                }
                // Fires outside the schedule; the planned next fire stays.
                if let Some(plan) = self.plans.get(&name) {
                    let job = plan.job.clone();
                    self.dispatch(job, Utc::now());
                }
            }
        }
    }

    /// Dispatch every due plan that the window and busy set admit, and
    /// advance every due plan regardless; skipped fires are lost, not
    /// queued.
    fn schedule_pass(&mut self, now: DateTime<Utc>) {
        let mut due: Vec<String> = self
            .plans
            .values()
            .filter(|p| p.is_due(now))
            .map(|p| p.job.name.clone())
            .collect();
        // Same-instant fires go out in name order for determinism.
        due.sort();

        let mut dispatches: Vec<(Job, DateTime<Utc>)> = Vec::new();
        let mut exhausted: Vec<String> = Vec::new();

        for name in due {
            let Some(plan) = self.plans.get_mut(&name) else {
                continue;
            };
            let plan_time = plan.next_time;
            let admitted = plan.window_admits(now) && !self.executing.contains_key(&name);
            if admitted {
                dispatches.push((plan.job.clone(), plan_time));
            } else {
                debug!(job = %name, "due fire skipped");
            }
            if !plan.advance(now) {
                exhausted.push(name);
            }
        }

        for name in exhausted {
            warn!(job = %name, "schedule has no upcoming fire, retiring plan");
            self.plans.remove(&name);
        }

        for (job, plan_time) in dispatches {
            self.dispatch(job, plan_time);
        }
    }

    fn dispatch(&mut self, job: Job, plan_time: DateTime<Utc>) {
        let info = ExecuteInfo::new(job, plan_time);
        debug!(job = %info.job.name, plan_time = %plan_time, "dispatching");
        self.executing
            .insert(info.job.name.clone(), info.cancel.clone());
        self.dispatcher.dispatch(info, self.result_tx.clone());
    }

    /// Clear the busy entry and forward the record to the log sink.
    ///
    /// Losing the lock race is the normal fleet-wide case and produces no
    /// log entry.
    fn complete(&mut self, result: ExecuteResult) {
        self.executing.remove(&result.info.job.name);

        if matches!(result.err, Some(ExecError::LockBusy)) {
            debug!(job = %result.info.job.name, "lost lock race");
            return;
        }

        match &result.err {
            None => debug!(job = %result.info.job.name, "execution finished"),
            Some(e) => warn!(job = %result.info.job.name, error = %e, "execution failed"),
        }

        self.sink
            .append(JobLog::from_result(&result, &self.local_ip));
    }
}
