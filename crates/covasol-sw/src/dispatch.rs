//! Event dispatch for a running worker.
//!
//! Callers talk to the worker through a [`WorkerHandle`]. Install and activate
//! are handled one at a time in arrival order. Fetch, push, click and sync
//! events each run in their own task, so a slow network response never holds
//! up other requests.

use covasol_net::Request;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::controller::{ActivationReport, ClickOutcome, OfflineController};
use crate::push::NotificationId;
use crate::strategy::FetchOutcome;
use crate::sync::SyncOutcome;
use crate::ServiceWorkerError;

type Reply<T> = oneshot::Sender<Result<T, ServiceWorkerError>>;

/// Events delivered to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
    Install(Reply<()>),
    Activate(Reply<ActivationReport>),
    Fetch(Request, Reply<FetchOutcome>),
    Push(Option<Vec<u8>>, oneshot::Sender<Option<NotificationId>>),
    NotificationClick(NotificationId, Reply<ClickOutcome>),
    Sync(String, oneshot::Sender<SyncOutcome>),
    Shutdown,
}

/// Start the dispatch loop for `controller`.
pub fn spawn_worker(controller: OfflineController, capacity: usize) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run(controller, rx));
    WorkerHandle { tx }
}

async fn run(controller: OfflineController, mut rx: mpsc::Receiver<WorkerEvent>) {
    debug!("Worker dispatch loop started");

    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Install(reply) => {
                let _ = reply.send(controller.install().await);
            }
            WorkerEvent::Activate(reply) => {
                let _ = reply.send(controller.activate().await);
            }
            WorkerEvent::Fetch(request, reply) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let _ = reply.send(controller.handle_fetch(&request).await);
                });
            }
            WorkerEvent::Push(data, reply) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let _ = reply.send(controller.handle_push(data.as_deref()).await);
                });
            }
            WorkerEvent::NotificationClick(id, reply) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let _ = reply.send(controller.handle_notification_click(id).await);
                });
            }
            WorkerEvent::Sync(tag, reply) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let _ = reply.send(controller.handle_sync(&tag).await);
                });
            }
            WorkerEvent::Shutdown => break,
        }
    }

    info!("Worker dispatch loop stopped");
}

/// Sending side of a running worker. Clones share the same worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    async fn send(&self, event: WorkerEvent) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ServiceWorkerError::Closed)
    }

    async fn call<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> WorkerEvent,
    ) -> Result<T, ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(event(reply)).await?;
        rx.await.map_err(|_| ServiceWorkerError::Closed)?
    }

    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.call(WorkerEvent::Install).await
    }

    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.call(WorkerEvent::Activate).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, ServiceWorkerError> {
        self.call(|reply| WorkerEvent::Fetch(request, reply)).await
    }

    pub async fn push(
        &self,
        data: Option<Vec<u8>>,
    ) -> Result<Option<NotificationId>, ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerEvent::Push(data, reply)).await?;
        rx.await.map_err(|_| ServiceWorkerError::Closed)
    }

    pub async fn notification_click(
        &self,
        id: NotificationId,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.call(|reply| WorkerEvent::NotificationClick(id, reply))
            .await
    }

    pub async fn sync(&self, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerEvent::Sync(tag.to_string(), reply)).await?;
        rx.await.map_err(|_| ServiceWorkerError::Closed)
    }

    /// Stop the dispatch loop. Events already handed to tasks still finish.
    pub async fn shutdown(&self) -> Result<(), ServiceWorkerError> {
        self.send(WorkerEvent::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
