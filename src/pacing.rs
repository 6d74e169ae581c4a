// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Paced single-flight dispatch queue.
//!
//! Tasks run strictly in submission order, one at a time, with a minimum
//! spacing between the end of one dispatch and the start of the next. The
//! spacing is what shields a scarce backend from thundering-herd bursts:
//! however deep the backlog gets, the backend sees at most one request per
//! floor interval.
//!
//! Callers hold a [`TaskHandle`] and await the outcome. Dropping the handle
//! cancels the task if it has not started; the worker checks for abandoned
//! handles both before and after the pacing wait so a dead caller never
//! burns a dispatch slot.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics;

type Job<R, E> = Pin<Box<dyn Future<Output = Result<R, E>> + Send>>;

#[derive(Debug, Error)]
pub enum QueueError<E> {
    /// The queue was shut down before this task could run.
    #[error("queue is shut down")]
    Closed,
    /// The task sat in the backlog past its useful lifetime and was dropped
    /// without running.
    #[error("task discarded unexecuted after waiting {waited:?}")]
    Discarded { waited: Duration },
    /// The task ran and failed; the underlying error is preserved intact.
    #[error("task execution failed")]
    Execution(#[source] E),
    /// The task panicked while executing. The worker survives; the panic
    /// is reported here instead of unwinding the queue.
    #[error("task panicked during execution")]
    Panicked,
}

struct QueuedTask<R, E> {
    id: u64,
    enqueued_at: Instant,
    job: Job<R, E>,
    reply: oneshot::Sender<Result<R, QueueError<E>>>,
}

struct Backlog<R, E> {
    tasks: VecDeque<QueuedTask<R, E>>,
    closed: bool,
}

struct QueueShared<R, E> {
    backlog: Mutex<Backlog<R, E>>,
    wakeup: Notify,
    next_id: AtomicU64,
    floor: Duration,
}

/// Handle to one submitted task.
pub struct TaskHandle<R, E> {
    id: u64,
    rx: oneshot::Receiver<Result<R, QueueError<E>>>,
}

impl<R, E> TaskHandle<R, E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the task's outcome. Consumes the handle; dropping it
    /// instead cancels the task if it has not been dispatched yet.
    pub async fn outcome(self) -> Result<R, QueueError<E>> {
        self.rx.await.unwrap_or_else(|_| Err(QueueError::Closed))
    }
}

pub struct PacingQueue<R, E> {
    shared: Arc<QueueShared<R, E>>,
    started: AtomicBool,
}

impl<R, E> PacingQueue<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    pub fn new(floor: Duration) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                backlog: Mutex::new(Backlog {
                    tasks: VecDeque::new(),
                    closed: false,
                }),
                wakeup: Notify::new(),
                next_id: AtomicU64::new(0),
                floor,
            }),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatch worker. Returns its join handle on the first
    /// call and `None` on every call after that.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let shared = self.shared.clone();
        Some(tokio::spawn(Self::run(shared)))
    }

    /// Append a task to the backlog.
    ///
    /// The job does not run until every earlier task has finished and the
    /// pacing floor since the previous dispatch has elapsed. A job that
    /// panics resolves the handle with [`QueueError::Panicked`] and leaves
    /// the worker running.
    pub fn submit<F>(&self, job: F) -> TaskHandle<R, E>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let depth = {
            let mut backlog = self.shared.backlog.lock();
            if backlog.closed {
                drop(backlog);
                metrics::record_task_outcome("rejected_closed");
                let _ = tx.send(Err(QueueError::Closed));
                return TaskHandle { id, rx };
            }
            backlog.tasks.push_back(QueuedTask {
                id,
                enqueued_at: Instant::now(),
                job: Box::pin(job),
                reply: tx,
            });
            backlog.tasks.len()
        };

        metrics::set_queue_depth(depth);
        self.shared.wakeup.notify_one();
        TaskHandle { id, rx }
    }

    /// Tasks waiting in the backlog, not counting one in flight.
    pub fn depth(&self) -> usize {
        self.shared.backlog.lock().tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.backlog.lock().closed
    }

    /// Close the queue: reject all queued tasks, refuse new submissions,
    /// and stop the worker once any in-flight task finishes.
    pub fn shutdown(&self) {
        let drained = {
            let mut backlog = self.shared.backlog.lock();
            backlog.closed = true;
            backlog.tasks.drain(..).collect::<Vec<_>>()
        };

        for task in drained {
            metrics::record_task_outcome("rejected_closed");
            let _ = task.reply.send(Err(QueueError::Closed));
        }
        metrics::set_queue_depth(0);
        self.shared.wakeup.notify_one();
    }

    /// Reject every queued task older than `max_age`, preserving the order
    /// of the survivors. Returns how many were discarded.
    pub fn discard_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale = {
            let mut backlog = self.shared.backlog.lock();
            let mut kept = VecDeque::with_capacity(backlog.tasks.len());
            let mut stale = Vec::new();
            while let Some(task) = backlog.tasks.pop_front() {
                if now.saturating_duration_since(task.enqueued_at) > max_age {
                    stale.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            backlog.tasks = kept;
            metrics::set_queue_depth(backlog.tasks.len());
            stale
        };

        let discarded = stale.len();
        for task in stale {
            let waited = now.saturating_duration_since(task.enqueued_at);
            warn!(
                task_id = task.id,
                waited_ms = waited.as_millis() as u64,
                "discarding stale queued task"
            );
            metrics::record_task_outcome("discarded");
            let _ = task.reply.send(Err(QueueError::Discarded { waited }));
        }
        discarded
    }

    async fn run(shared: Arc<QueueShared<R, E>>) {
        // Pacing is measured from the end of the previous dispatch, so the
        // anchor lives here rather than in the shared state.
        let mut last_end: Option<Instant> = None;

        loop {
            let task = {
                let mut backlog = shared.backlog.lock();
                if backlog.closed {
                    for task in backlog.tasks.drain(..) {
                        metrics::record_task_outcome("rejected_closed");
                        let _ = task.reply.send(Err(QueueError::Closed));
                    }
                    metrics::set_queue_depth(0);
                    break;
                }
                let task = backlog.tasks.pop_front();
                if task.is_some() {
                    metrics::set_queue_depth(backlog.tasks.len());
                }
                task
            };

            let Some(task) = task else {
                shared.wakeup.notified().await;
                continue;
            };

            if task.reply.is_closed() {
                debug!(task_id = task.id, "caller gone before dispatch, skipping");
                metrics::record_task_outcome("cancelled");
                continue;
            }

            if let Some(end) = last_end {
                let wait = shared.floor.saturating_sub(end.elapsed());
                if !wait.is_zero() {
                    metrics::record_pacing_delay(wait);
                    tokio::time::sleep(wait).await;
                }
            }

            // The caller may have walked away during the pacing wait. The
            // floor has elapsed either way, so the anchor stays put.
            if task.reply.is_closed() {
                debug!(task_id = task.id, "caller gone during pacing wait, skipping");
                metrics::record_task_outcome("cancelled");
                continue;
            }

            metrics::record_queue_wait(task.enqueued_at.elapsed());
            // The job runs on its own task so a panic unwinds that task,
            // not the worker; nothing else is dequeued until the join
            // resolves.
            let outcome = tokio::spawn(task.job).await;
            last_end = Some(Instant::now());

            match outcome {
                Ok(Ok(value)) => {
                    metrics::record_task_outcome("completed");
                    let _ = task.reply.send(Ok(value));
                }
                Ok(Err(err)) => {
                    metrics::record_task_outcome("failed");
                    let _ = task.reply.send(Err(QueueError::Execution(err)));
                }
                Err(join_err) => {
                    error!(task_id = task.id, error = %join_err, "dispatched job panicked");
                    metrics::record_task_outcome("panicked");
                    let _ = task.reply.send(Err(QueueError::Panicked));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn queue(floor_ms: u64) -> PacingQueue<u32, TestError> {
        PacingQueue::new(Duration::from_millis(floor_ms))
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let q = queue(0);
        q.start().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0..5u32 {
            let order = order.clone();
            handles.push(q.submit(async move {
                order.lock().push(n);
                Ok(n)
            }));
        }

        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.outcome().await.unwrap(), n as u32);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_floor_separates_consecutive_dispatches() {
        let floor = Duration::from_millis(150);
        let q = queue(150);
        q.start().unwrap();

        // Each job records its start and end so the gap can be measured
        // from the previous end, which is where the floor is anchored.
        let spans = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0..3u32 {
            let spans = spans.clone();
            handles.push(q.submit(async move {
                let started = Instant::now();
                spans.lock().push((started, Instant::now()));
                Ok(n)
            }));
        }
        for handle in handles {
            handle.outcome().await.unwrap();
        }

        let spans = spans.lock();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            let gap = pair[1].0.duration_since(pair[0].1);
            assert!(gap >= floor, "gap {:?} under the {:?} floor", gap, floor);
        }
    }

    #[tokio::test]
    async fn test_first_task_dispatches_immediately() {
        let q = queue(500);
        q.start().unwrap();

        let submitted = Instant::now();
        let handle = q.submit(async move { Ok(1u32) });
        handle.outcome().await.unwrap();
        assert!(submitted.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_single_flight() {
        let q = queue(0);
        q.start().unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for n in 0..4u32 {
            let in_flight = in_flight.clone();
            handles.push(q.submit(async move {
                let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0, "overlapping dispatch");
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }));
        }
        for handle in handles {
            handle.outcome().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_execution_error_surfaces_intact() {
        let q = queue(0);
        q.start().unwrap();

        let handle = q.submit(async { Err::<u32, _>(TestError("backend melted".into())) });
        match handle.outcome().await {
            Err(QueueError::Execution(inner)) => assert_eq!(inner, TestError("backend melted".into())),
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_job_leaves_worker_alive() {
        let q = queue(0);
        q.start().unwrap();

        let bad = q.submit(async { panic!("job blew up") });
        let good = q.submit(async { Ok(7u32) });

        assert!(matches!(bad.outcome().await, Err(QueueError::Panicked)));
        assert_eq!(good.outcome().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels_undispatched_task() {
        let q = queue(100);
        q.start().unwrap();

        let blocker = q.submit(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(0u32)
        });

        let victim_ran = Arc::new(AtomicUsize::new(0));
        let flag = victim_ran.clone();
        let victim = q.submit(async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(1u32)
        });
        drop(victim);

        let witness = q.submit(async { Ok(2u32) });

        blocker.outcome().await.unwrap();
        assert_eq!(witness.outcome().await.unwrap(), 2);
        assert_eq!(victim_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_and_new_tasks() {
        // No worker: tasks stay queued until shutdown sweeps them.
        let q = queue(0);

        let queued = q.submit(async { Ok(1u32) });
        assert_eq!(q.depth(), 1);

        q.shutdown();
        assert!(q.is_closed());
        assert!(matches!(queued.outcome().await, Err(QueueError::Closed)));

        let late = q.submit(async { Ok(2u32) });
        assert!(matches!(late.outcome().await, Err(QueueError::Closed)));
        assert_eq!(q.depth(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_started_worker() {
        let q = queue(0);
        let worker = q.start().unwrap();

        q.submit(async { Ok(1u32) }).outcome().await.unwrap();
        q.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_stale_rejects_only_old_tasks() {
        let q = queue(0);

        let old = q.submit(async { Ok(1u32) });
        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = q.submit(async { Ok(2u32) });

        assert_eq!(q.discard_stale(Duration::from_millis(20)), 1);
        assert_eq!(q.depth(), 1);

        match old.outcome().await {
            Err(QueueError::Discarded { waited }) => {
                assert!(waited >= Duration::from_millis(40));
            }
            other => panic!("expected discard, got {:?}", other),
        }

        // The fresh task survives and runs once the worker starts.
        q.start().unwrap();
        assert_eq!(fresh.outcome().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let q = queue(0);
        assert!(q.start().is_some());
        assert!(q.start().is_none());
    }

    #[tokio::test]
    async fn test_task_ids_are_sequential() {
        let q = queue(0);
        let first = q.submit(async { Ok(1u32) });
        let second = q.submit(async { Ok(2u32) });
        assert!(second.id() > first.id());
    }
}
