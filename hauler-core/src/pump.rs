//! Chunked copy loop shared by single and parallel fetches.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    errors::{HaulerError, Result},
    event::{publish, EventSender, TransferEvent},
    metric::TransferMetric,
    result::Delivered,
    storage::{remove_if_exists, Storage},
};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    Completed(Delivered),
    Cancelled,
}

/// Copies one source into one sink, `chunk_size` bytes at a time.
///
/// Cancellation is looked at on chunk boundaries only: before each read and
/// again before the chunk that was just read gets written.
pub struct StreamPump<'a> {
    chunk_size: usize,
    cancel: &'a CancellationToken,
    events: Option<&'a EventSender>,
    worker: usize,
}

impl<'a> StreamPump<'a> {
    pub fn new(chunk_size: usize, cancel: &'a CancellationToken) -> Self {
        StreamPump {
            chunk_size: chunk_size.max(1),
            cancel,
            events: None,
            worker: 0,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn for_worker(mut self, worker: usize) -> Self {
        self.worker = worker;
        self
    }

    /// Runs until `source` reports EOF. The metric's total is informational
    /// and never used to decide when to stop.
    pub async fn pump<R>(
        &self,
        mut source: R,
        mut storage: Storage,
        metric: &mut TransferMetric,
    ) -> Result<PumpOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let mut buffer = vec![0u8; self.chunk_size];

        publish(
            self.events,
            TransferEvent::Started {
                worker: self.worker,
                total_bytes: metric.total_bytes(),
            },
        );

        loop {
            if self.cancel.is_cancelled() {
                return self.abandon(storage).await;
            }

            let read = match source.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    storage.discard_quietly().await;
                    return Err(HaulerError::Read(e));
                }
            };

            if self.cancel.is_cancelled() {
                return self.abandon(storage).await;
            }

            if let Err(e) = storage.write_chunk(&buffer[..read]).await {
                storage.discard_quietly().await;
                return Err(e);
            }

            metric.record(read as u64, started.elapsed());
            publish(
                self.events,
                TransferEvent::Progress {
                    worker: self.worker,
                    metric: *metric,
                },
            );
        }

        let path = storage.path().map(|p| p.to_path_buf());
        let delivered = match storage.finish().await {
            Ok(delivered) => delivered,
            Err(e) => {
                if let Some(path) = path {
                    let _ = remove_if_exists(&path).await;
                }
                return Err(e);
            }
        };

        metric.record(0, started.elapsed());
        debug!(
            worker = self.worker,
            bytes = metric.bytes_transferred(),
            "stream drained"
        );
        publish(
            self.events,
            TransferEvent::WorkerCompleted {
                worker: self.worker,
                metric: *metric,
            },
        );
        Ok(PumpOutcome::Completed(delivered))
    }

    async fn abandon(&self, storage: Storage) -> Result<PumpOutcome> {
        debug!(worker = self.worker, "cancellation observed, discarding sink");
        storage.discard().await?;
        Ok(PumpOutcome::Cancelled)
    }
}
