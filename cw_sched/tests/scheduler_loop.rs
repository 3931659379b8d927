//! ABOUTME: Scheduler main-loop behavior against a fake executor
//! ABOUTME: Covers timed dispatch, single-instance policy, kill, and delete

use cw_core::{ExecuteInfo, ExecuteResult, Job, JobEvent};
use cw_logsink::{LogAppender, SinkMetrics};
use cw_sched::{Dispatch, Scheduler};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fake executor; optionally reports immediate success for each dispatch.
struct FakeExecutor {
    dispatched: Arc<Mutex<Vec<ExecuteInfo>>>,
    reply: bool,
}

impl Dispatch for FakeExecutor {
    fn dispatch(&self, info: ExecuteInfo, results: mpsc::Sender<ExecuteResult>) {
        self.dispatched.lock().unwrap().push(info.clone());
        if self.reply {
            let result = ExecuteResult {
                info,
                output: b"hi\n".to_vec(),
                err: None,
                start_time: chrono::Utc::now(),
                end_time: chrono::Utc::now(),
            };
            tokio::spawn(async move {
                let _ = results.send(result).await;
            });
        }
    }
}

struct Harness {
    dispatched: Arc<Mutex<Vec<ExecuteInfo>>>,
    event_tx: mpsc::Sender<JobEvent>,
    log_rx: mpsc::Receiver<cw_core::JobLog>,
    shutdown: CancellationToken,
}

fn start(reply: bool) -> Harness {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (log_tx, log_rx) = mpsc::channel(64);
    let sink = LogAppender::new(log_tx, SinkMetrics::new());
    let dispatcher = Arc::new(FakeExecutor {
        dispatched: dispatched.clone(),
        reply,
    });
    let scheduler = Scheduler::new(event_rx, dispatcher, sink, "127.0.0.1".into());
    let shutdown = CancellationToken::new();
    tokio::spawn(scheduler.run(shutdown.clone()));
    Harness {
        dispatched,
        event_tx,
        log_rx,
        shutdown,
    }
}

fn every_second(name: &str) -> Job {
    Job {
        name: name.into(),
        command: "echo hi".into(),
        cron_expr: "*/1 * * * * *".into(),
        email: "a@b.c".into(),
        ..Job::default()
    }
}

#[tokio::test]
async fn test_saved_job_fires_and_logs() {
    let mut harness = start(true);
    harness
        .event_tx
        .send(JobEvent::Save(every_second("hello")))
        .await
        .unwrap();

    let dispatched = harness.dispatched.clone();
    let fired = test_support::wait_until(Duration::from_secs(3), move || {
        !dispatched.lock().unwrap().is_empty()
    })
    .await;
    assert!(fired, "job should fire within two seconds of the save");

    let log = tokio::time::timeout(Duration::from_secs(2), harness.log_rx.recv())
        .await
        .expect("log within deadline")
        .expect("log present");
    assert_eq!(log.job_name, "hello");
    assert_eq!(log.output, "hi\n");
    assert!(log.err.is_empty());

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_busy_job_is_not_dispatched_again() {
    // The executor never reports back, so the job stays busy.
    let harness = start(false);
    harness
        .event_tx
        .send(JobEvent::Save(every_second("hello")))
        .await
        .unwrap();

    let dispatched = harness.dispatched.clone();
    let fired = test_support::wait_until(Duration::from_secs(3), move || {
        !dispatched.lock().unwrap().is_empty()
    })
    .await;
    assert!(fired);

    // Two more fire instants pass; the single-instance policy drops both.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(harness.dispatched.lock().unwrap().len(), 1);

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_kill_event_cancels_running_execution() {
    let harness = start(false);
    harness
        .event_tx
        .send(JobEvent::Save(every_second("hello")))
        .await
        .unwrap();

    let dispatched = harness.dispatched.clone();
    let fired = test_support::wait_until(Duration::from_secs(3), move || {
        !dispatched.lock().unwrap().is_empty()
    })
    .await;
    assert!(fired);

    let info = harness.dispatched.lock().unwrap()[0].clone();
    assert!(!info.cancel.is_cancelled());

    harness
        .event_tx
        .send(JobEvent::Kill("hello".into()))
        .await
        .unwrap();

    let cancel = info.cancel.clone();
    let cancelled =
        test_support::wait_until(Duration::from_millis(500), move || cancel.is_cancelled()).await;
    assert!(cancelled, "kill must cancel the execution promptly");

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_delete_stops_further_dispatches() {
    let harness = start(true);
    harness
        .event_tx
        .send(JobEvent::Save(every_second("hello")))
        .await
        .unwrap();

    let dispatched = harness.dispatched.clone();
    let fired = test_support::wait_until(Duration::from_secs(3), move || {
        !dispatched.lock().unwrap().is_empty()
    })
    .await;
    assert!(fired);

    harness
        .event_tx
        .send(JobEvent::Delete("hello".into()))
        .await
        .unwrap();
    // Allow an in-flight pass to settle before sampling the count.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let count = harness.dispatched.lock().unwrap().len();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(harness.dispatched.lock().unwrap().len(), count);

    harness.shutdown.cancel();
}
