//! Fixed-size pool of dispatch workers.
//!
//! Requests enter one FIFO queue shared by all workers; each worker runs a
//! single webhook call at a time, so at most `size` calls are in flight and
//! the rest wait in arrival order. Queue backlog has nothing to do with the
//! per-user admission gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{DispatchError, GenerationBackend, GenerationRequest, GenerationResult};

type DispatchReply = Result<GenerationResult, DispatchError>;

struct DispatchJob {
    request: GenerationRequest,
    respond_to: oneshot::Sender<DispatchReply>,
}

pub struct DispatchPool {
    sender: Mutex<Option<mpsc::UnboundedSender<DispatchJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    size: usize,
}

impl DispatchPool {
    /// Spawns `size` workers sharing `backend`. Must be called inside a
    /// tokio runtime.
    pub fn start(size: usize, backend: Arc<dyn GenerationBackend>) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    backend.clone(),
                    queued.clone(),
                ))
            })
            .collect();

        info!("Dispatch pool started with {size} workers");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            queued,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Requests waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Queues the request and waits for a worker to finish it.
    pub async fn dispatch(&self, request: GenerationRequest) -> DispatchReply {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(DispatchError::PoolClosed)?;

        let (respond_to, response) = oneshot::channel();
        self.queued.fetch_add(1, Ordering::Relaxed);
        if sender.send(DispatchJob { request, respond_to }).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::PoolClosed);
        }

        response.await.map_err(|_| DispatchError::Aborted)?
    }

    /// Stops accepting work, lets workers drain the queue for up to `grace`,
    /// then aborts whatever is still running.
    pub async fn shutdown(&self, grace: Duration) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(|handle| handle.abort_handle()).collect();

        let drained = timeout(grace, async {
            for handle in workers {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Dispatch pool drain timed out; aborting remaining workers");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Dispatch pool shutdown complete");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<DispatchJob>>>,
    backend: Arc<dyn GenerationBackend>,
    queued: Arc<AtomicUsize>,
) {
    debug!("Dispatch worker {worker_id} started");
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(DispatchJob { request, respond_to }) = job else {
            break;
        };
        queued.fetch_sub(1, Ordering::Relaxed);

        if respond_to.is_closed() {
            debug!(
                "Dispatch worker {worker_id} skipping abandoned request for user {}",
                request.user_id
            );
            continue;
        }

        // The call runs in its own task so a panicking backend only loses this
        // request; dropping `respond_to` surfaces it as `Aborted`.
        let backend = backend.clone();
        let user_id = request.user_id;
        let call = tokio::spawn(async move {
            let reply = backend.generate(&request).await;
            let _ = respond_to.send(reply);
        });
        if let Err(err) = call.await {
            error!("Dispatch worker {worker_id} lost request for user {user_id}: {err}");
        }
    }
    debug!("Dispatch worker {worker_id} stopped");
}
