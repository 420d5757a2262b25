use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use taskcontrol_core::ControllerConfig;

use crate::controller::JobController;
use crate::job::{FnJob, Job, JobError, JobPriority, JobStatus};
use crate::pool::{Executor, PoolError};

fn controller(threads: usize) -> JobController {
    JobController::new(ControllerConfig {
        worker_threads: threads,
        thread_name_prefix: "ctl-worker".into(),
        high_priority_prefix: "ctl-high".into(),
        ..ControllerConfig::default()
    })
    .unwrap()
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Blocks until `gate` opens or it is cancelled.
fn gated(name: &str, gate: &Arc<AtomicBool>) -> Arc<dyn Job> {
    let gate = Arc::clone(gate);
    Arc::new(FnJob::new(name, move |ctx| {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !gate.load(Ordering::Acquire) && Instant::now() < deadline {
            if ctx.is_canceled() {
                return Err(JobError::Canceled);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }))
}

fn quick(name: &str) -> Arc<dyn Job> {
    Arc::new(FnJob::new(name, |_| Ok(())))
}

#[test]
fn submitted_job_finishes_and_leaves_registry() {
    let ctl = controller(2);
    let job = ctl.submit(quick("import")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));
    assert_eq!(job.status(), JobStatus::Finished);

    let metrics = ctl.metrics();
    assert_eq!(metrics.jobs_submitted, 1);
    assert_eq!(metrics.jobs_finished, 1);
    assert!(metrics.avg_job_duration.contains_key("import"));
}

#[test]
fn high_priority_bypasses_saturated_main_pool() {
    let ctl = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let blocker = ctl.submit(gated("blocker", &gate)).unwrap();
    let queued = ctl.submit(quick("queued normal")).unwrap();

    let thread_name = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&thread_name);
    let urgent = Arc::new(
        FnJob::new("urgent", move |_| {
            *sink.lock() = thread::current().name().unwrap_or_default().to_string();
            Ok(())
        })
        .with_priority(JobPriority::High),
    );
    let urgent = ctl.submit(urgent).unwrap();

    assert!(wait_until(Duration::from_secs(5), || urgent.status() == JobStatus::Finished));
    assert_eq!(blocker.status(), JobStatus::Processing);
    assert_eq!(queued.status(), JobStatus::Waiting);
    assert!(thread_name.lock().starts_with("ctl-high-"));
    assert_eq!(ctl.metrics().high_priority_submitted, 1);

    gate.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));
}

#[test]
fn priority_override_routes_to_side_pool() {
    let ctl = controller(1);
    let job = ctl.submit_with_priority(quick("promoted"), JobPriority::High).unwrap();
    assert_eq!(job.priority(), JobPriority::High);
    assert!(wait_until(Duration::from_secs(5), || job.status().is_terminal()));
    assert_eq!(ctl.high_priority_pool().spawned_total(), 1);
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let ctl = controller(1);
    ctl.shutdown();
    assert!(ctl.is_shutdown());

    let job = quick("too late");
    let err = ctl.submit(Arc::clone(&job)).unwrap_err();
    assert!(matches!(err, PoolError::Shutdown(_)));
    assert_eq!(job.status(), JobStatus::Error);
    assert!(ctl.jobs().is_empty());
    assert_eq!(ctl.metrics().jobs_failed, 1);
}

#[test]
fn submit_all_keeps_order() {
    let ctl = controller(2);
    let gate = Arc::new(AtomicBool::new(false));
    let jobs = vec![gated("a", &gate), gated("b", &gate), gated("c", &gate)];
    let wrapped = ctl.submit_all(jobs).unwrap();

    let names: Vec<String> = ctl.snapshot().into_iter().map(|s| s.description).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    gate.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || {
        wrapped.iter().all(|j| j.status() == JobStatus::Finished)
    }));
}

#[test]
fn blocking_run_uses_caller_thread() {
    let ctl = controller(1);
    let caller = thread::current().id();
    let job = Arc::new(FnJob::new("carrier", move |_| {
        assert_eq!(thread::current().id(), caller);
        Ok(())
    }));
    let wrapped = ctl.run_on_this_thread_blocking(job).unwrap();
    assert_eq!(wrapped.status(), JobStatus::Finished);
    assert!(ctl.jobs().is_empty());
    assert_eq!(ctl.metrics().jobs_finished, 1);
}

#[test]
fn cancel_all_reaches_running_and_queued_jobs() {
    let ctl = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let running = ctl.submit(gated("running", &gate)).unwrap();
    let queued = ctl.submit(gated("queued", &gate)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || running.status() == JobStatus::Processing));

    ctl.cancel_all();
    assert_eq!(queued.status(), JobStatus::Canceled);
    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));
    assert_eq!(running.status(), JobStatus::Canceled);
    assert_eq!(ctl.metrics().jobs_canceled, 2);
}

#[test]
fn snapshot_serializes() {
    let ctl = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let job = ctl.submit(gated("visible", &gate)).unwrap();

    let json = serde_json::to_value(ctl.snapshot()).unwrap();
    assert_eq!(json[0]["description"], "visible");
    assert_eq!(json[0]["priority"], "Normal");
    assert_eq!(json[0]["id"], job.id().to_string());

    gate.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));
}

#[test]
fn pool_job_shares_the_main_pool() {
    let ctl = controller(2);
    let children = (0..3).map(|i| quick(&format!("child {i}"))).collect();
    let composite = Arc::new(ctl.pool_job("batch", children));

    let wrapped = ctl.run_on_this_thread_blocking(composite.clone()).unwrap();
    assert_eq!(wrapped.status(), JobStatus::Finished);
    assert_eq!(composite.finished_count(), 3);
    assert!(!ctl.main_pool().is_shutdown());
}

#[test]
fn lightweight_pool_job_uses_configured_stack() {
    let ctl = controller(1);
    let children = (0..3).map(|i| quick(&format!("io {i}"))).collect();
    let composite = ctl.lightweight_pool_job("io batch", children);

    let wrapped = ctl.submit(Arc::new(composite)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || wrapped.status().is_terminal()));
    assert_eq!(wrapped.status(), JobStatus::Finished);
    assert_eq!(wrapped.progress(), Some(1.0));
}

#[test]
fn submitted_pool_job_runs_on_a_carrier_with_one_worker() {
    let ctl = controller(1);
    let coordinator = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&coordinator);
    let children = (0..2).map(|i| quick(&format!("child {i}"))).collect();
    let composite = Arc::new(ctl.pool_job("batch", children));
    composite.add_status_listener(Arc::new(move |event: &crate::listener::StatusEvent| {
        if event.current == JobStatus::Processing {
            *sink.lock() = thread::current().name().unwrap_or_default().to_string();
        }
    }));

    let wrapped = ctl.submit(composite.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || wrapped.status().is_terminal()));
    assert_eq!(wrapped.status(), JobStatus::Finished);
    assert_eq!(composite.finished_count(), 2);
    assert!(coordinator.lock().starts_with("ctl-worker-carrier-"));
    assert_eq!(ctl.carrier_pool().spawned_total(), 1);
}

#[test]
fn resized_main_pool_takes_new_work() {
    let ctl = controller(1);
    let before = ctl.main_pool();
    ctl.set_worker_threads(3).unwrap();
    assert_eq!(ctl.worker_threads(), 3);
    assert_eq!(ctl.main_pool().threads(), 3);

    let gate = Arc::new(AtomicBool::new(false));
    let jobs: Vec<_> = (0..3)
        .map(|i| ctl.submit(gated(&format!("wide {i}"), &gate)).unwrap())
        .collect();
    assert!(wait_until(Duration::from_secs(5), || {
        jobs.iter().all(|j| j.status() == JobStatus::Processing)
    }));
    gate.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));

    // Holders of the old pool can still use it.
    assert!(!before.is_shutdown());
    assert_eq!(before.threads(), 1);
}

#[test]
fn resize_to_same_size_keeps_the_pool() {
    let ctl = controller(2);
    let before = ctl.main_pool();
    ctl.set_worker_threads(2).unwrap();
    before.shutdown();
    assert!(ctl.main_pool().is_shutdown());
}

#[test]
fn resize_after_shutdown_is_rejected() {
    let ctl = controller(1);
    ctl.shutdown();
    let err = ctl.set_worker_threads(4).unwrap_err();
    assert!(matches!(err, PoolError::Shutdown(_)));
    assert_eq!(ctl.worker_threads(), 1);
}

#[test]
fn cancelling_a_queued_job_settles_it_before_returning() {
    let ctl = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let running = ctl.submit(gated("running", &gate)).unwrap();
    let queued = ctl.submit(quick("queued")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || running.status() == JobStatus::Processing));

    queued.cancel();
    assert!(ctl.jobs().iter().all(|j| j.id() != queued.id()));
    assert_eq!(ctl.metrics().jobs_canceled, 1);

    gate.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || ctl.jobs().is_empty()));
}
