use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{bounded, never, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;
use crate::core::error::{Error, ErrorKind, Result};

/// What a submission does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Fail the submission with `Overloaded`.
    Reject,
    /// Wait for queue space.
    Block,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the outcome of a submitted task.
pub struct Completion {
    receiver: Receiver<Result<()>>,
}

impl Completion {
    pub fn wait(self) -> Result<()> {
        self.receiver.recv()
            .unwrap_or_else(|_| Err(Error::new(ErrorKind::Internal, "task dropped before completion")))
    }

    /// None when the task has not finished within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(Error::new(ErrorKind::Internal, "task dropped before completion")))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
}

struct Queues {
    shared: Sender<Job>,
    lanes: Vec<Sender<Job>>,
}

/// Fixed set of named threads draining one shared bounded queue.
///
/// Each thread also owns a lane. Tasks submitted under the same key land in
/// the same lane and run one at a time in submission order.
pub struct WorkerPool {
    name: String,
    policy: BackpressurePolicy,
    queues: Mutex<Option<Queues>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize, capacity: usize, policy: BackpressurePolicy) -> Result<Self> {
        let threads = threads.max(1);
        let (shared, receiver) = bounded::<Job>(capacity);
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(threads);
        let mut lanes = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let (lane, lane_receiver) = bounded::<Job>(capacity);
            lanes.push(lane);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || run_worker(receiver, lane_receiver))?;
            workers.push(handle);
        }

        tracing::debug!(pool = name, threads, capacity, ?policy, "started worker pool");
        Ok(WorkerPool {
            name: name.to_string(),
            policy,
            queues: Mutex::new(Some(Queues { shared, lanes })),
            workers: Mutex::new(workers),
            stats,
        })
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Queues `task`. A panicking task is reported through its `Completion`
    /// and does not take the worker thread down.
    pub fn submit<F>(&self, task: F) -> Result<Completion>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.enqueue(None, self.policy, task)
    }

    /// Queues `task` behind every earlier task submitted with the same key.
    pub fn submit_keyed<F>(&self, key: &str, task: F) -> Result<Completion>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.enqueue(Some(key), self.policy, task)
    }

    /// Like `submit_keyed` but fails with `Overloaded` instead of waiting,
    /// whatever the configured policy.
    pub fn try_submit_keyed<F>(&self, key: &str, task: F) -> Result<Completion>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.enqueue(Some(key), BackpressurePolicy::Reject, task)
    }

    fn enqueue<F>(&self, key: Option<&str>, policy: BackpressurePolicy, task: F) -> Result<Completion>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        let stats = self.stats.clone();
        let job: Job = Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(_) => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    Err(Error::new(ErrorKind::Internal, "task panicked"))
                }
            };
            if result.is_err() {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody waiting is fine
            let _ = done_tx.send(result);
        });

        let sender = {
            let queues = self.queues.lock();
            let queues = queues.as_ref().ok_or_else(|| self.shut_down())?;
            match key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    queues.lanes[(hasher.finish() % queues.lanes.len() as u64) as usize].clone()
                }
                None => queues.shared.clone(),
            }
        };

        match policy {
            BackpressurePolicy::Reject => match sender.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::new(ErrorKind::Overloaded, format!("pool '{}' queue is full", self.name)));
                }
                Err(TrySendError::Disconnected(_)) => return Err(self.shut_down()),
            },
            BackpressurePolicy::Block => {
                sender.send(job).map_err(|_| self.shut_down())?;
            }
        }

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(Completion { receiver: done_rx })
    }

    fn shut_down(&self) -> Error {
        Error::new(ErrorKind::InvalidState, format!("pool '{}' is shut down", self.name))
    }

    /// Stops accepting work, lets queued tasks finish and joins the threads.
    pub fn shutdown(&self) {
        drop(self.queues.lock().take());

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            // Last reference dropped by one of our own tasks
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread panicked");
            }
        }
        tracing::debug!(pool = %self.name, "worker pool stopped");
    }
}

/// Drains the shared queue and the worker's own lane until both are closed.
fn run_worker(shared: Receiver<Job>, lane: Receiver<Job>) {
    let closed = never::<Job>();
    let mut shared_open = true;
    let mut lane_open = true;
    while shared_open || lane_open {
        let from_shared = if shared_open { shared.clone() } else { closed.clone() };
        let from_lane = if lane_open { lane.clone() } else { closed.clone() };
        select! {
            recv(from_shared) -> job => match job {
                Ok(job) => job(),
                Err(_) => shared_open = false,
            },
            recv(from_lane) -> job => match job {
                Ok(job) => job(),
                Err(_) => lane_open = false,
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crossbeam::channel::unbounded;

    #[test]
    fn runs_tasks_and_reports_results() {
        let pool = WorkerPool::new("test", 2, 8, BackpressurePolicy::Block).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let completions: Vec<Completion> = (0..5)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }).unwrap()
            })
            .collect();
        for completion in completions {
            completion.wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);

        let failing = pool.submit(|| Err(Error::new(ErrorKind::Io, "boom"))).unwrap();
        assert_eq!(failing.wait().unwrap_err().kind, ErrorKind::Io);
    }

    #[test]
    fn panics_are_contained() {
        let pool = WorkerPool::new("test", 1, 4, BackpressurePolicy::Block).unwrap();
        let panicked = pool.submit(|| panic!("task failure")).unwrap();
        assert_eq!(panicked.wait().unwrap_err().kind, ErrorKind::Internal);

        // The single worker is still alive
        pool.submit(|| Ok(())).unwrap().wait().unwrap();
        assert_eq!(pool.stats().panicked.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reject_policy_when_full() {
        let pool = WorkerPool::new("test", 1, 1, BackpressurePolicy::Reject).unwrap();
        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();

        // Occupy the worker, then fill the single queue slot
        let running = pool.submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        }).unwrap();
        started_rx.recv().unwrap();
        let queued = pool.submit(|| Ok(())).unwrap();

        let err = pool.submit(|| Ok(())).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert_eq!(pool.stats().rejected.load(Ordering::Relaxed), 1);

        release_tx.send(()).unwrap();
        running.wait().unwrap();
        queued.wait().unwrap();
    }

    #[test]
    fn shutdown_drains_queue() {
        let pool = WorkerPool::new("test", 1, 16, BackpressurePolicy::Block).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }).unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.submit(|| Ok(())).err().unwrap().kind, ErrorKind::InvalidState);
    }

    #[test]
    fn same_key_runs_in_submission_order() {
        let pool = WorkerPool::new("test", 4, 64, BackpressurePolicy::Block).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut completions = Vec::new();
        for i in 0..500u32 {
            let seen = seen.clone();
            completions.push(pool.submit_keyed("Article", move || {
                seen.lock().push(i);
                Ok(())
            }).unwrap());
            // Unkeyed work competes for the same threads
            completions.push(pool.submit(|| {
                thread::yield_now();
                Ok(())
            }).unwrap());
        }
        for completion in completions {
            completion.wait().unwrap();
        }
        assert_eq!(*seen.lock(), (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn try_submit_never_waits_under_block_policy() {
        let pool = WorkerPool::new("test", 1, 1, BackpressurePolicy::Block).unwrap();
        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();

        let running = pool.submit_keyed("Article", move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        }).unwrap();
        started_rx.recv().unwrap();
        let queued = pool.submit_keyed("Article", || Ok(())).unwrap();

        let err = pool.try_submit_keyed("Article", || Ok(())).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Overloaded);

        release_tx.send(()).unwrap();
        running.wait().unwrap();
        queued.wait().unwrap();
    }
}
