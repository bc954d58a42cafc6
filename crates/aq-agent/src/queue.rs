//! Serialized update queue.
//!
//! Every mutation of the persisted snapshot goes through one writer thread.
//! Each queued unit loads the stored snapshot, applies its updater and saves
//! the result before the next unit starts, so concurrent handlers can never
//! overwrite each other's writes. Reads are queued behind pending updates.
//!
//! A failing unit (storage error or panicking updater) is logged and reported
//! to its caller only; the writer keeps draining the queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;

use aq_core::Snapshot;
use aq_db::{DbError, SnapshotStore};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Update queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The writer has shut down.
    #[error("update queue is closed")]
    Closed,
    /// Loading or saving the snapshot failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
    /// The updater panicked; the snapshot was not saved.
    #[error("updater panicked: {0}")]
    UpdaterPanicked(String),
    /// The writer thread could not be started.
    #[error("failed to start writer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

type Updater = Box<dyn FnOnce(&mut Snapshot) + Send>;
type Reply<T> = oneshot::Sender<Result<T, QueueError>>;

enum Command {
    Update { updater: Updater, reply: Reply<()> },
    Read { reply: Reply<Snapshot> },
    Clear { reply: Reply<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Completion handle for a queued unit.
///
/// The unit is already queued when this is returned; awaiting only observes
/// its result.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> Pending<T> {
    pub async fn wait(self) -> Result<T, QueueError> {
        self.rx.await.map_err(|_| QueueError::Closed)?
    }
}

/// Handle to the single snapshot writer.
#[derive(Debug)]
pub struct UpdateQueue {
    sender: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl UpdateQueue {
    /// Starts the writer thread, which takes ownership of `store`.
    pub fn spawn<S>(store: S) -> Result<Self, QueueError>
    where
        S: SnapshotStore + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name("aq-writer".to_string())
            .spawn(move || run_writer(Box::new(store), receiver))
            .map_err(QueueError::Spawn)?;
        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues an updater. Units run in submission order.
    pub fn submit<F>(&self, updater: F) -> Pending<()>
    where
        F: FnOnce(&mut Snapshot) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        // A closed writer drops the command, and with it `reply`.
        let _ = self.sender.send(Command::Update {
            updater: Box::new(updater),
            reply,
        });
        Pending { rx }
    }

    /// Queues an updater and waits for it to be persisted.
    pub async fn update<F>(&self, updater: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Snapshot) + Send + 'static,
    {
        self.submit(updater).wait().await
    }

    /// Queues a read behind every unit submitted so far.
    pub fn submit_read(&self) -> Pending<Snapshot> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(Command::Read { reply });
        Pending { rx }
    }

    pub async fn read(&self) -> Result<Snapshot, QueueError> {
        self.submit_read().wait().await
    }

    /// Queues erasure of the stored snapshot.
    pub fn submit_clear(&self) -> Pending<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(Command::Clear { reply });
        Pending { rx }
    }

    /// Drains everything queued so far, then stops the writer.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("writer thread panicked");
            }
        }
    }
}

fn run_writer(mut store: Box<dyn SnapshotStore>, mut receiver: mpsc::UnboundedReceiver<Command>) {
    tracing::debug!("writer started");
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Update { updater, reply } => {
                let result = apply_update(store.as_mut(), updater);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "queued update failed");
                }
                let _ = reply.send(result);
            }
            Command::Read { reply } => {
                let result = store.load().map_err(QueueError::from);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "snapshot read failed");
                }
                let _ = reply.send(result);
            }
            Command::Clear { reply } => {
                let result = store.clear().map_err(QueueError::from);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "snapshot clear failed");
                }
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                receiver.close();
                // Units queued before the shutdown request still run.
                while let Ok(command) = receiver.try_recv() {
                    drain_one(store.as_mut(), command);
                }
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("writer stopped");
}

fn drain_one(store: &mut dyn SnapshotStore, command: Command) {
    match command {
        Command::Update { updater, reply } => {
            let _ = reply.send(apply_update(store, updater));
        }
        Command::Read { reply } => {
            let _ = reply.send(store.load().map_err(QueueError::from));
        }
        Command::Clear { reply } => {
            let _ = reply.send(store.clear().map_err(QueueError::from));
        }
        Command::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn apply_update(store: &mut dyn SnapshotStore, updater: Updater) -> Result<(), QueueError> {
    let mut snapshot = store.load()?;
    panic::catch_unwind(AssertUnwindSafe(|| updater(&mut snapshot)))
        .map_err(|payload| QueueError::UpdaterPanicked(panic_message(payload.as_ref())))?;
    store.save(&snapshot)?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aq_db::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn updates_apply_in_order() {
        let store = MemoryStore::new();
        let queue = UpdateQueue::spawn(store.clone()).unwrap();

        let first = queue.submit(|s| s.behavior.session_count = 1);
        let second = queue.submit(|s| s.behavior.session_count *= 10);
        first.wait().await.unwrap();
        second.wait().await.unwrap();

        assert_eq!(queue.read().await.unwrap().behavior.session_count, 10);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = MemoryStore::new();
        let queue = Arc::new(UpdateQueue::spawn(store.clone()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.update(|s| s.behavior.session_count += 1).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.snapshot().unwrap().behavior.session_count, 50);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_updater_does_not_wedge_queue() {
        let store = MemoryStore::new();
        let queue = UpdateQueue::spawn(store.clone()).unwrap();

        let failed = queue.update(|_| panic!("boom")).await;
        assert!(matches!(failed, Err(QueueError::UpdaterPanicked(msg)) if msg == "boom"));

        queue.update(|s| s.behavior.session_count = 7).await.unwrap();
        assert_eq!(queue.read().await.unwrap().behavior.session_count, 7);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_pending_units() {
        let store = MemoryStore::new();
        let queue = UpdateQueue::spawn(store.clone()).unwrap();

        let pending = queue.submit(|s| s.behavior.session_count = 3);
        queue.shutdown().await;
        pending.wait().await.unwrap();
        assert_eq!(store.snapshot().unwrap().behavior.session_count, 3);

        let after = queue.update(|s| s.behavior.session_count = 4).await;
        assert!(matches!(after, Err(QueueError::Closed)));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn clear_erases_stored_snapshot() {
        let store = MemoryStore::new();
        let queue = UpdateQueue::spawn(store.clone()).unwrap();
        queue.update(|s| s.behavior.session_count = 1).await.unwrap();
        queue.submit_clear().wait().await.unwrap();
        assert!(store.snapshot().is_none());
        queue.shutdown().await;
    }
}
