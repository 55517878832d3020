//! Render lanes - each runs in a dedicated thread
//!
//! A lane executes one job at a time, so jobs of the same tier are strictly
//! serialized. Termination is signalled by dropping the job's done sender,
//! which is what [`super::scheduler::TaskHandle::wait`] blocks on.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, error, warn};

use super::request::{RenderFault, TaskCompletion, TaskId, TaskStatus, Tier};

/// Cancellation token for cooperative job cancellation
///
/// Jobs poll [`CancellationToken::is_cancelled`] and return early once it
/// flips. All clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Convenience for `?` inside render loops
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Marker returned by [`CancellationToken::check`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

/// Work executed on a lane
pub type JobFn = Box<dyn FnOnce(&CancellationToken) -> Result<(), RenderFault> + Send>;

pub(crate) struct RenderJob {
    pub id: TaskId,
    pub tier: Tier,
    pub token: CancellationToken,
    pub work: JobFn,
    /// Dropped after the job stopped touching its target
    pub done: Sender<()>,
}

pub(crate) enum LaneRequest {
    Run(RenderJob),
    Shutdown,
}

/// A dedicated worker thread for one tier
pub(crate) struct Lane {
    tier: Tier,
    requests: Sender<LaneRequest>,
    thread: Option<JoinHandle<()>>,
}

impl Lane {
    pub fn spawn(tier: Tier, completions: Sender<TaskCompletion>) -> Self {
        let (request_tx, request_rx) = flume::unbounded();
        let thread = std::thread::spawn(move || {
            lane_worker(tier, request_rx, completions);
        });
        Self {
            tier,
            requests: request_tx,
            thread: Some(thread),
        }
    }

    /// Queue a job. Fails if the lane thread is gone, in which case the
    /// job is dropped and its done signal released.
    pub fn run(&self, job: RenderJob) -> Result<(), RenderFault> {
        self.requests
            .send(LaneRequest::Run(job))
            .map_err(|_| RenderFault::generic("render lane unavailable"))
    }

    pub fn shutdown(&mut self) {
        let _ = self.requests.send(LaneRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} lane thread panicked", self.tier.name());
            }
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
fn lane_worker(tier: Tier, requests: Receiver<LaneRequest>, completions: Sender<TaskCompletion>) {
    debug!("{} lane started", tier.name());
    for request in requests.iter() {
        match request {
            LaneRequest::Run(job) => run_job(job, &completions),
            LaneRequest::Shutdown => break,
        }
    }
    debug!("{} lane stopped", tier.name());
}

fn run_job(job: RenderJob, completions: &Sender<TaskCompletion>) {
    let RenderJob {
        id,
        tier,
        token,
        work,
        done,
    } = job;

    let status = if token.is_cancelled() {
        TaskStatus::Cancelled
    } else {
        match catch_unwind(AssertUnwindSafe(|| work(&token))) {
            Ok(_) if token.is_cancelled() => TaskStatus::Cancelled,
            Ok(Ok(())) => TaskStatus::Completed,
            Ok(Err(fault)) => {
                warn!("{} task {id:?} failed: {fault}", tier.name());
                TaskStatus::Failed(fault)
            }
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                error!("{} task {id:?} panicked: {detail}", tier.name());
                TaskStatus::Failed(RenderFault::Panicked { detail })
            }
        }
    };

    // Queue the completion before releasing waiters so that a returning
    // cancel can already observe it.
    let _ = completions.send(TaskCompletion { id, tier, status });
    drop(done);
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[test]
    fn panicking_job_reports_failure() {
        let (tx, rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::unbounded::<()>();
        run_job(
            RenderJob {
                id: TaskId::new(7),
                tier: Tier::Patch,
                token: CancellationToken::new(),
                work: Box::new(|_| panic!("boom")),
                done: done_tx,
            },
            &tx,
        );

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.id, TaskId::new(7));
        assert_eq!(
            completion.status,
            TaskStatus::Failed(RenderFault::Panicked {
                detail: "boom".to_string()
            })
        );
        assert!(done_rx.is_disconnected());
    }

    #[test]
    fn pre_cancelled_job_never_runs() {
        let (tx, rx) = flume::unbounded();
        let (done_tx, _done_rx) = flume::unbounded::<()>();
        let token = CancellationToken::new();
        token.cancel();
        run_job(
            RenderJob {
                id: TaskId::new(1),
                tier: Tier::FullPage,
                token,
                work: Box::new(|_| panic!("must not run")),
                done: done_tx,
            },
            &tx,
        );
        assert_eq!(rx.try_recv().unwrap().status, TaskStatus::Cancelled);
    }
}
