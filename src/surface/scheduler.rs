//! Render task scheduler - one lane and at most one live task per tier

use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, trace, warn};

use super::request::{RenderFault, TaskCompletion, TaskId, TaskStatus, Tier};
use super::worker::{CancellationToken, Lane, RenderJob};

/// Caller-side handle of a submitted task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    tier: Tier,
    token: CancellationToken,
    done: Receiver<()>,
}

impl TaskHandle {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// True once the task can no longer write to its target
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.is_disconnected()
    }

    /// Block until the lane dropped the job
    pub fn wait(&self) {
        // Nothing is ever sent; recv returns once the sender is dropped.
        let _ = self.done.recv();
    }

    /// Request cancellation and block until the task stopped.
    /// A no-op for tasks that already finished.
    pub fn cancel_and_wait(&self) {
        if self.is_finished() {
            return;
        }
        self.token.cancel();
        self.wait();
    }
}

/// Runs render jobs on one full-page lane and one patch lane.
///
/// Submitting for a tier first cancels-and-waits for the task currently
/// active on that tier, so two tasks of the same tier never overlap.
pub struct RenderScheduler {
    lanes: Vec<Lane>,
    active: [Option<TaskHandle>; 2],
    completion_tx: Sender<TaskCompletion>,
    completion_rx: Receiver<TaskCompletion>,
    next_task_id: u64,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = flume::unbounded();
        let lanes = Tier::ALL
            .iter()
            .map(|&tier| Lane::spawn(tier, completion_tx.clone()))
            .collect();
        Self {
            lanes,
            active: [None, None],
            completion_tx,
            completion_rx,
            next_task_id: 1,
        }
    }

    /// Submit a job for `tier`, cancelling the tier's previous task first
    pub fn submit<F>(&mut self, tier: Tier, work: F) -> TaskHandle
    where
        F: FnOnce(&CancellationToken) -> Result<(), RenderFault> + Send + 'static,
    {
        self.cancel_tier(tier);

        let id = self.next_id();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = flume::bounded(1);
        let handle = TaskHandle {
            id,
            tier,
            token: token.clone(),
            done: done_rx,
        };

        let job = RenderJob {
            id,
            tier,
            token,
            work: Box::new(work),
            done: done_tx,
        };

        if let Err(fault) = self.lanes[tier.index()].run(job) {
            warn!("{} lane is gone, failing task {id:?}", tier.name());
            let _ = self.completion_tx.send(TaskCompletion {
                id,
                tier,
                status: TaskStatus::Failed(fault),
            });
        }

        debug!("Submitted {} task {id:?}", tier.name());
        self.active[tier.index()] = Some(handle.clone());
        handle
    }

    /// Cancel `handle` and wait for it. No-op for finished or unknown tasks.
    pub fn cancel(&mut self, handle: &TaskHandle) {
        handle.cancel_and_wait();
        let slot = &mut self.active[handle.tier.index()];
        if slot.as_ref().is_some_and(|h| h.id == handle.id) {
            *slot = None;
        }
    }

    /// Cancel-and-wait the task active on `tier`, if any
    pub fn cancel_tier(&mut self, tier: Tier) {
        if let Some(handle) = self.active[tier.index()].take() {
            trace!("Cancelling {} task {:?}", tier.name(), handle.id);
            handle.cancel_and_wait();
        }
    }

    pub fn cancel_all(&mut self) {
        for tier in Tier::ALL {
            self.cancel_tier(tier);
        }
    }

    /// The task currently owning `tier`, finished or not, until its
    /// completion is collected
    #[must_use]
    pub fn active(&self, tier: Tier) -> Option<&TaskHandle> {
        self.active[tier.index()].as_ref()
    }

    #[must_use]
    pub fn is_busy(&self, tier: Tier) -> bool {
        self.active(tier).is_some()
    }

    /// Drain finished tasks. Completions of tasks that were cancelled or
    /// superseded are dropped.
    pub fn poll_completions(&mut self) -> Vec<TaskCompletion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            if let Some(current) = self.accept(completion) {
                completions.push(current);
            }
        }
        completions
    }

    /// Block up to `timeout` for the next current completion
    pub fn wait_completion(&mut self, timeout: Duration) -> Option<TaskCompletion> {
        let deadline = Instant::now() + timeout;
        loop {
            let completion = self.completion_rx.recv_deadline(deadline).ok()?;
            if let Some(current) = self.accept(completion) {
                return Some(current);
            }
        }
    }

    fn accept(&mut self, completion: TaskCompletion) -> Option<TaskCompletion> {
        let slot = &mut self.active[completion.tier.index()];
        if slot.as_ref().is_some_and(|h| h.id == completion.id) {
            *slot = None;
            Some(completion)
        } else {
            trace!(
                "Dropping stale {} completion {:?}",
                completion.tier.name(),
                completion.id
            );
            None
        }
    }

    /// Cancel everything and stop the lanes
    pub fn shutdown(&mut self) {
        self.cancel_all();
        for lane in &mut self.lanes {
            lane.shutdown();
        }
    }

    fn next_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Job that spins until cancelled
    fn spin_until_cancelled(
        started: Arc<AtomicBool>,
    ) -> impl FnOnce(&CancellationToken) -> Result<(), RenderFault> + Send + 'static {
        move |token| {
            started.store(true, Ordering::SeqCst);
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    fn wait_for(flag: &AtomicBool) {
        let deadline = Instant::now() + TIMEOUT;
        while !flag.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn completed_task_is_reported_once() {
        let mut scheduler = RenderScheduler::new();
        let handle = scheduler.submit(Tier::FullPage, |_| Ok(()));

        let completion = scheduler.wait_completion(TIMEOUT).unwrap();
        assert_eq!(completion.id, handle.id());
        assert_eq!(completion.status, TaskStatus::Completed);
        assert!(!scheduler.is_busy(Tier::FullPage));
        assert!(scheduler.poll_completions().is_empty());
    }

    #[test]
    fn cancel_blocks_until_job_returns() {
        let mut scheduler = RenderScheduler::new();
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let stopped_in_job = Arc::clone(&stopped);
        let started_in_job = Arc::clone(&started);
        let handle = scheduler.submit(Tier::Patch, move |token| {
            started_in_job.store(true, Ordering::SeqCst);
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(20));
            stopped_in_job.store(true, Ordering::SeqCst);
            Ok(())
        });

        wait_for(&started);
        scheduler.cancel(&handle);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(handle.is_finished());

        // Cancelling again is a no-op
        scheduler.cancel(&handle);
        assert!(scheduler.poll_completions().is_empty());
    }

    #[test]
    fn submit_cancels_previous_task_of_same_tier() {
        let mut scheduler = RenderScheduler::new();
        let started = Arc::new(AtomicBool::new(false));
        let first = scheduler.submit(Tier::FullPage, spin_until_cancelled(Arc::clone(&started)));
        wait_for(&started);

        let second = scheduler.submit(Tier::FullPage, |_| Ok(()));
        assert!(first.is_finished());

        let completion = scheduler.wait_completion(TIMEOUT).unwrap();
        assert_eq!(completion.id, second.id());
        assert_eq!(completion.status, TaskStatus::Completed);
    }

    #[test]
    fn tiers_run_concurrently() {
        let mut scheduler = RenderScheduler::new();
        let full_started = Arc::new(AtomicBool::new(false));
        let patch_started = Arc::new(AtomicBool::new(false));

        let full = scheduler.submit(Tier::FullPage, spin_until_cancelled(Arc::clone(&full_started)));
        let patch = scheduler.submit(Tier::Patch, spin_until_cancelled(Arc::clone(&patch_started)));

        wait_for(&full_started);
        wait_for(&patch_started);
        assert!(!full.is_finished());
        assert!(!patch.is_finished());

        scheduler.cancel_all();
        assert!(full.is_finished());
        assert!(patch.is_finished());
    }

    #[test]
    fn never_two_active_tasks_per_tier() {
        let mut scheduler = RenderScheduler::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            scheduler.submit(Tier::Patch, move |token| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                for _ in 0..5 {
                    if token.is_cancelled() {
                        break;
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        scheduler.cancel_all();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_reported_not_thrown() {
        let mut scheduler = RenderScheduler::new();
        scheduler.submit(Tier::FullPage, |_| {
            Err(RenderFault::OutOfMemory { bytes: 1 << 30 })
        });
        let completion = scheduler.wait_completion(TIMEOUT).unwrap();
        assert!(matches!(
            completion.status,
            TaskStatus::Failed(RenderFault::OutOfMemory { .. })
        ));
    }

    #[test]
    fn submit_after_shutdown_fails_the_task() {
        let mut scheduler = RenderScheduler::new();
        scheduler.shutdown();

        let handle = scheduler.submit(Tier::Patch, |_| Ok(()));
        assert!(handle.is_finished());
        let completion = scheduler.wait_completion(TIMEOUT).unwrap();
        assert_eq!(completion.id, handle.id());
        assert_eq!(
            completion.status,
            TaskStatus::Failed(RenderFault::generic("render lane unavailable"))
        );
    }
}
