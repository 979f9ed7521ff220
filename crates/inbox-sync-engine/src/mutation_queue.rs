//! Single ordered pipeline for local write intents.
//!
//! One unbounded channel feeds one worker task, so intents settle strictly in
//! enqueue order. Each intent carries a oneshot for its result. An intent is
//! never cancelled once enqueued, even if the caller stops waiting.

use crate::executor::{MutationExecutor, MutationKind};
use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct Intent {
    kind: MutationKind,
    version: u64,
    reply: oneshot::Sender<SyncResult<()>>,
}

struct Sender {
    tx: mpsc::UnboundedSender<Intent>,
    next_version: u64,
}

pub struct MutationQueue {
    sender: Mutex<Option<Sender>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MutationQueue {
    /// Spawn the worker.
    pub fn start(executor: MutationExecutor) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(executor, rx));

        Self {
            sender: Mutex::new(Some(Sender { tx, next_version: 0 })),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue an intent and wait for it to settle.
    pub async fn enqueue(&self, kind: MutationKind) -> SyncResult<()> {
        let (reply, result) = oneshot::channel();
        {
            let mut sender = self.sender.lock();
            let sender = sender.as_mut().ok_or(SyncError::QueueClosed)?;
            sender.next_version += 1;
            let version = sender.next_version;
            debug!(kind = kind.as_str(), target = kind.target(), version, "Mutation enqueued");
            sender
                .tx
                .send(Intent {
                    kind,
                    version,
                    reply,
                })
                .map_err(|_| SyncError::QueueClosed)?;
        }
        result.await.map_err(|_| SyncError::QueueClosed)?
    }

    /// Stop accepting intents and wait for the queued ones to settle.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn run_worker(executor: MutationExecutor, mut rx: mpsc::UnboundedReceiver<Intent>) {
    while let Some(intent) = rx.recv().await {
        let result = executor.execute(&intent.kind, intent.version).await;
        let _ = intent.reply.send(result);
    }
    info!("Mutation worker stopped");
}
