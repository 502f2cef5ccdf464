//! Keyed serial executor.
//!
//! Jobs submitted under the same key run one at a time, in submission order.
//! Jobs under different keys run concurrently, bounded by a shared worker
//! semaphore. Every key with queued work owns one drain task; the task and
//! its queue are dropped as soon as the key goes idle.

use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error, PartialEq)]
pub enum ExecutorError {
    #[error("executor is shut down")]
    Closed,
    #[error("job was dropped before completing")]
    Canceled,
}

struct KeyQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

/// Handle to the output of a submitted job.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the job to finish. Fails with `Canceled` if it panicked.
    pub async fn wait(self) -> Result<T, ExecutorError> {
        self.rx.await.map_err(|_| ExecutorError::Canceled)
    }
}

pub struct KeyedSerialExecutor<K> {
    queues: Arc<DashMap<K, KeyQueue>>,
    workers: Arc<Semaphore>,
    closed: AtomicBool,
}

impl<K> KeyedSerialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(max_workers: usize) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `fut` behind every job already submitted for `key`.
    pub fn submit<F, T>(&self, key: K, fut: F) -> Result<JobHandle<T>, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let out = fut.await;
            let _ = tx.send(out);
        });

        // The entry guard holds the shard lock, so the drain task cannot
        // retire this queue between the pending bump and the send.
        let entry = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| self.spawn_queue(key.clone()));
        entry.pending.fetch_add(1, Ordering::SeqCst);
        if entry.tx.send(job).is_err() {
            entry.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutorError::Closed);
        }
        Ok(JobHandle { rx })
    }

    fn spawn_queue(&self, key: K) -> KeyQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let queues = Arc::clone(&self.queues);
        let workers = Arc::clone(&self.workers);
        let task_pending = Arc::clone(&pending);

        debug!(?key, "starting serial queue");
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match Arc::clone(&workers).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                if let Err(e) = tokio::spawn(job).await {
                    error!(?key, error = %e, "serial job panicked");
                }
                drop(permit);

                if task_pending.fetch_sub(1, Ordering::SeqCst) == 1
                    && queues
                        .remove_if(&key, |_, q| q.pending.load(Ordering::SeqCst) == 0)
                        .is_some()
                {
                    debug!(?key, "serial queue idle, retiring");
                    break;
                }
            }
        });

        KeyQueue { tx, pending }
    }

    /// Jobs queued or running for `key`.
    pub fn pending(&self, key: &K) -> usize {
        self.queues
            .get(key)
            .map(|q| q.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Keys that currently own a queue.
    pub fn active_keys(&self) -> usize {
        self.queues.len()
    }

    /// Reject new submissions; queued jobs still run.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
