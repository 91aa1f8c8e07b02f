//! Broker-style worker pool.
//!
//! Every idle worker publishes a one-shot slot on the `available` channel.
//! The dispatcher pairs the next queued job with the next published slot,
//! and the worker runs the job to completion before publishing a fresh slot.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{Error, QueueConfig, Result};

/// Tracing target for the job queue.
pub const TRACING_TARGET: &str = "vip_worker::queue";

/// A detached unit of background work.
///
/// Jobs take no input and report nothing back; failures are handled (and
/// logged) inside [`Job::run`].
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Runs the job to completion.
    async fn run(&self);

    /// Short label for logs.
    fn name(&self) -> &str {
        "job"
    }
}

type BoxedJob = Box<dyn Job>;
type Slot = oneshot::Sender<BoxedJob>;

/// Bounded intake in front of a fixed set of workers.
pub struct JobQueue {
    intake: mpsc::Sender<BoxedJob>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    workers: usize,
}

impl JobQueue {
    /// Starts the dispatcher and all workers.
    ///
    /// Capacity and worker count are raised to at least one.
    pub fn start(config: &QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        let workers = config.workers.max(1);

        let (intake, queued) = mpsc::channel(capacity);
        let (available, slots) = mpsc::channel(workers);
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        for id in 0..workers {
            tracker.spawn(worker(id, available.clone()));
        }
        drop(available);
        tracker.spawn(dispatch(queued, slots, shutdown.clone()));
        tracker.close();

        tracing::info!(target: TRACING_TARGET, capacity, workers, "job queue started");
        Self {
            intake,
            shutdown,
            tracker,
            workers,
        }
    }

    /// Enqueues `job`, waiting while the intake is full.
    pub async fn push(&self, job: impl Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        self.intake
            .send(Box::new(job))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Enqueues `job` only if there is room right now.
    pub fn try_push(&self, job: impl Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        match self.intake.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Full),
            Err(TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    /// Jobs waiting in the intake.
    pub fn pending(&self) -> usize {
        self.intake.max_capacity() - self.intake.capacity()
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stops dispatching and waits up to `timeout` for running jobs.
    ///
    /// Queued jobs are dropped. Returns `false` when the wait timed out.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !finished {
            tracing::warn!(
                target: TRACING_TARGET,
                timeout_ms = timeout.as_millis() as u64,
                "jobs still running after shutdown timeout"
            );
        }
        finished
    }
}

async fn dispatch(
    mut queued: mpsc::Receiver<BoxedJob>,
    mut slots: mpsc::Receiver<Slot>,
    shutdown: CancellationToken,
) {
    let mut dropped = 0;
    'intake: loop {
        let mut job = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            job = queued.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        loop {
            let slot = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    dropped += 1;
                    break 'intake;
                }
                slot = slots.recv() => slot,
            };
            let Some(slot) = slot else {
                dropped += 1;
                break 'intake;
            };
            // A slot whose worker is gone hands the job back.
            match slot.send(job) {
                Ok(()) => break,
                Err(returned) => job = returned,
            }
        }
    }

    queued.close();
    dropped += queued.len();
    tracing::info!(target: TRACING_TARGET, dropped, "dispatcher stopped");
}

async fn worker(id: usize, available: mpsc::Sender<Slot>) {
    loop {
        let (slot, assigned) = oneshot::channel();
        if available.send(slot).await.is_err() {
            break;
        }
        let Ok(job) = assigned.await else {
            break;
        };

        tracing::debug!(target: TRACING_TARGET, worker = id, job = job.name(), "running job");
        if AssertUnwindSafe(job.run()).catch_unwind().await.is_err() {
            tracing::error!(target: TRACING_TARGET, worker = id, job = job.name(), "job panicked");
        }
    }
    tracing::debug!(target: TRACING_TARGET, worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;

    fn config(capacity: usize, workers: usize) -> QueueConfig {
        QueueConfig { capacity, workers }
    }

    struct Count {
        index: usize,
        runs: Arc<Vec<AtomicUsize>>,
        done: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for Count {
        async fn run(&self) {
            tokio::task::yield_now().await;
            self.runs[self.index].fetch_add(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Blocks until the gate opens.
    struct Gated {
        started: Arc<Notify>,
        gate: Arc<Notify>,
        finished: Arc<AtomicBool>,
    }

    impl Gated {
        fn new(gate: &Arc<Notify>) -> (Self, Arc<Notify>, Arc<AtomicBool>) {
            let started = Arc::new(Notify::new());
            let finished = Arc::new(AtomicBool::new(false));
            let job = Self {
                started: started.clone(),
                gate: gate.clone(),
                finished: finished.clone(),
            };
            (job, started, finished)
        }
    }

    #[async_trait]
    impl Job for Gated {
        async fn run(&self) {
            self.started.notify_one();
            self.gate.notified().await;
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        async fn run(&self) {}
    }

    struct Panics;

    #[async_trait]
    impl Job for Panics {
        async fn run(&self) {
            panic!("job blew up");
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while counter.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs did not finish in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_every_job_exactly_once() {
        const JOBS: usize = 200;
        let queue = JobQueue::start(&config(8, 4));
        let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..JOBS).map(|_| AtomicUsize::new(0)).collect());
        let done = Arc::new(AtomicUsize::new(0));

        for index in 0..JOBS {
            let job = Count {
                index,
                runs: runs.clone(),
                done: done.clone(),
            };
            queue.push(job).await.unwrap();
        }

        wait_for(&done, JOBS).await;
        assert!(runs.iter().all(|runs| runs.load(Ordering::SeqCst) == 1));
        assert!(queue.shutdown(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), JOBS);
    }

    #[tokio::test]
    async fn try_push_reports_a_full_intake() {
        let queue = JobQueue::start(&config(1, 1));
        let gate = Arc::new(Notify::new());
        let (busy, started, _) = Gated::new(&gate);
        queue.push(busy).await.unwrap();
        started.notified().await;

        // One job can sit in the dispatcher and one in the intake.
        let mut accepted = 0;
        let full = loop {
            match queue.try_push(Noop) {
                Ok(()) => accepted += 1,
                Err(err) => break err,
            }
            assert!(accepted <= 2);
            tokio::task::yield_now().await;
        };
        assert_eq!(full, Error::Full);

        gate.notify_waiters();
        assert!(queue.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn shutdown_lets_running_jobs_finish() {
        let queue = JobQueue::start(&config(4, 1));
        let gate = Arc::new(Notify::new());
        let (job, started, finished) = Gated::new(&gate);
        queue.push(job).await.unwrap();
        started.notified().await;

        let opener = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            opener.notify_waiters();
        });

        assert!(queue.shutdown(Duration::from_secs(5)).await);
        assert!(finished.load(Ordering::SeqCst));

        let (late, _, _) = Gated::new(&gate);
        assert_eq!(queue.push(late).await, Err(Error::Closed));
        let (late, _, _) = Gated::new(&gate);
        assert_eq!(queue.try_push(late), Err(Error::Closed));
    }

    #[tokio::test]
    async fn a_panicking_job_does_not_kill_its_worker() {
        let queue = JobQueue::start(&config(4, 1));
        assert_eq!(queue.workers(), 1);
        let runs = Arc::new(vec![AtomicUsize::new(0)]);
        let done = Arc::new(AtomicUsize::new(0));

        queue.push(Panics).await.unwrap();
        let job = Count {
            index: 0,
            runs: runs.clone(),
            done: done.clone(),
        };
        queue.push(job).await.unwrap();

        wait_for(&done, 1).await;
        assert_eq!(queue.pending(), 0);
        queue.shutdown(Duration::from_secs(5)).await;
    }
}
