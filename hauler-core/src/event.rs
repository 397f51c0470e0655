use std::future::Future;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{self, JoinHandle},
};

use crate::metric::TransferMetric;

pub type EventSender = UnboundedSender<TransferEvent>;
pub type EventReceiver = UnboundedReceiver<TransferEvent>;

/// Lifecycle of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    ProbingSize,
    Fetching,
    Completed,
    Cancelled,
    Failed,
}

/// Notifications published while a transfer runs. `worker` is the range index
/// in parallel mode and `0` otherwise. Events of one worker arrive in order;
/// nothing is promised across workers.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    State(FetchState),
    Started { worker: usize, total_bytes: u64 },
    Progress { worker: usize, metric: TransferMetric },
    WorkerCompleted { worker: usize, metric: TransferMetric },
}

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Drains `rx` on its own task until every sender is gone.
pub fn spawn_observer<F>(mut rx: EventReceiver, mut on_event: F) -> JoinHandle<()>
where
    F: FnMut(TransferEvent) + Send + 'static,
{
    task::spawn(async move {
        while let Some(event) = rx.recv().await {
            on_event(event);
        }
    })
}

/// Same as [`spawn_observer`] for consumers that need to await.
pub fn spawn_async_observer<F, Fut>(mut rx: EventReceiver, mut on_event: F) -> JoinHandle<()>
where
    F: FnMut(TransferEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    task::spawn(async move {
        while let Some(event) = rx.recv().await {
            on_event(event).await;
        }
    })
}

/// Publishing never fails the transfer: a dropped observer just stops
/// receiving.
pub(crate) fn publish(events: Option<&EventSender>, event: TransferEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
