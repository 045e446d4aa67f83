//! Per-path ordered work queues

use futures::future::BoxFuture;
use lwm2m_shared::ResourcePath;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

type Job = BoxFuture<'static, ()>;

struct Worker {
    id: u64,
    jobs: mpsc::UnboundedSender<Job>,
}

type Workers = Arc<Mutex<HashMap<ResourcePath, Worker>>>;

/// Runs submitted jobs one at a time per key, in submission order
///
/// Jobs for different keys run concurrently. A worker task is started the
/// first time a key is seen and retires once its queue is empty.
#[derive(Default)]
pub struct PathQueues {
    workers: Workers,
    next_id: AtomicU64,
}

impl PathQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, key: ResourcePath, job: Job) {
        let mut workers = self.workers.lock().await;
        let job = match workers.get(&key) {
            Some(worker) => match worker.jobs.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let jobs = spawn_worker(key, id, job, self.workers.clone());
        workers.insert(key, Worker { id, jobs });
    }

    /// Number of keys with a live worker
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }
}

fn spawn_worker(
    key: ResourcePath,
    id: u64,
    first: Job,
    workers: Workers,
) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        trace!("Queue worker for {} started", key);
        let mut next = Some(first);
        while let Some(job) = next {
            job.await;

            // Submitters send while holding the map lock, so an empty queue
            // seen under it stays empty once the entry is gone
            let mut active = workers.lock().await;
            next = rx.try_recv().ok();
            if next.is_none() && active.get(&key).map(|worker| worker.id) == Some(id) {
                active.remove(&key);
            }
        }
        trace!("Queue worker for {} stopped", key);
    });
    tx
}
