//! Ranged fetch: N workers each pull one byte range into its own part file,
//! then the parts are stitched together in range order.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Instant,
};

use reqwest::{header, Client, StatusCode};
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncWriteExt},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    downloader::{clamp_to_ceiling, transition, Downloader},
    errors::{HaulerError, Result},
    event::{EventSender, FetchState},
    http,
    metric::{TimeUnit, TransferMetric},
    pump::{PumpOutcome, StreamPump},
    range::{plan_ranges, ByteRange},
    result::{Delivered, TransferOutcome, TransferResult},
    storage::{remove_if_exists, Storage},
};

/// Everything one range worker needs, owned so it can move onto a task.
struct RangeJob {
    index: usize,
    range: ByteRange,
    /// The only range, covering the whole resource. A plain `200 OK` is
    /// acceptable then.
    whole: bool,
    url: String,
    part_path: PathBuf,
    client: Client,
    chunk_size: usize,
    time_unit: TimeUnit,
    cancel: CancellationToken,
    events: Option<EventSender>,
}

enum RangeOutcome {
    Done(TransferMetric),
    Cancelled,
}

impl Downloader {
    /// Fetches `url` over `threads` concurrent ranged requests (defaults to
    /// the configured `max_threads`) and merges the parts into one file.
    ///
    /// The resource must report its length up front. On failure or
    /// cancellation no part file and no partial destination stay on disk.
    pub async fn fetch_parallel(
        &self,
        url: &str,
        file_name: Option<&str>,
        folder: Option<&Path>,
        threads: Option<usize>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<TransferOutcome> {
        transition(events, url, FetchState::Idle);
        let outcome = self
            .run_parallel(url, file_name, folder, threads, cancel, events)
            .await;

        match &outcome {
            Ok(TransferOutcome::Completed(result)) => {
                info!(
                    url,
                    bytes = result.size_bytes,
                    workers = result.worker_count,
                    elapsed = ?result.elapsed,
                    "parallel fetch completed"
                );
                transition(events, url, FetchState::Completed);
            }
            Ok(TransferOutcome::Cancelled) => transition(events, url, FetchState::Cancelled),
            Err(e) => {
                warn!(url, error = %e, "parallel fetch failed");
                transition(events, url, FetchState::Failed);
            }
        }
        outcome
    }

    async fn run_parallel(
        &self,
        url: &str,
        file_name: Option<&str>,
        folder: Option<&Path>,
        threads: Option<usize>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<TransferOutcome> {
        Url::parse(url)?;
        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }

        transition(events, url, FetchState::ProbingSize);
        let meta = tokio::select! {
            _ = cancel.cancelled() => return Ok(TransferOutcome::Cancelled),
            probed = http::probe(&self.client, url) => probed?,
        };
        let declared = meta
            .content_length
            .filter(|&n| n > 0)
            .ok_or_else(|| HaulerError::LengthUnknown {
                url: url.to_string(),
            })?;
        let (total, clamp) = clamp_to_ceiling(declared, self.config.max_download_size);
        if let Some(clamp) = clamp {
            warn!(
                url,
                declared = clamp.declared,
                ceiling = clamp.ceiling,
                "declared length exceeds ceiling, clamping"
            );
        }

        let destination =
            self.resolver
                .resolve(url, file_name.or(meta.file_name.as_deref()), folder)?;
        let threads = threads.unwrap_or(self.max_threads).max(1);
        let ranges = plan_ranges(total, threads as u64);
        let part_paths: Vec<PathBuf> = (0..ranges.len())
            .map(|index| part_path(&destination, index))
            .collect();
        debug!(
            url,
            total,
            workers = ranges.len(),
            destination = %destination.display(),
            "ranges planned"
        );

        transition(events, url, FetchState::Fetching);
        let started = Instant::now();
        let workers = cancel.child_token();
        let whole = ranges.len() == 1;

        let mut set = JoinSet::new();
        for (index, range) in ranges.iter().copied().enumerate() {
            let job = RangeJob {
                index,
                range,
                whole,
                url: url.to_string(),
                part_path: part_paths[index].clone(),
                client: self.client.clone(),
                chunk_size: self.config.chunk_size,
                time_unit: self.config.time_unit,
                cancel: workers.clone(),
                events: events.cloned(),
            };
            set.spawn(async move { (index, fetch_range(job).await) });
        }

        let mut metrics: Vec<Option<TransferMetric>> = vec![None; ranges.len()];
        let mut failure: Option<HaulerError> = None;
        let mut cancelled = false;
        while let Some(joined) = set.join_next().await {
            let error = match joined {
                Ok((index, Ok(RangeOutcome::Done(metric)))) => {
                    metrics[index] = Some(metric);
                    continue;
                }
                Ok((_, Ok(RangeOutcome::Cancelled))) => {
                    cancelled = true;
                    continue;
                }
                Ok((index, Err(e))) => {
                    warn!(url, index, error = %e, "range worker failed");
                    e
                }
                Err(e) => HaulerError::Worker(e.to_string()),
            };
            if failure.is_none() {
                workers.cancel();
                failure = Some(error);
            }
        }

        if let Some(error) = failure {
            remove_leftovers(&part_paths, None).await;
            return Err(error);
        }
        if cancelled || cancel.is_cancelled() {
            remove_leftovers(&part_paths, None).await;
            return Ok(TransferOutcome::Cancelled);
        }

        if let Err(e) = merge_parts(&destination, &part_paths).await {
            remove_leftovers(&part_paths, Some(&destination)).await;
            return Err(e);
        }

        let finished: Vec<TransferMetric> = metrics.into_iter().flatten().collect();
        let mut metric = TransferMetric::combine(finished)
            .unwrap_or_else(|| TransferMetric::new(Some(total), total, self.config.time_unit));
        let elapsed = started.elapsed();
        metric.record(0, elapsed);

        Ok(TransferOutcome::Completed(TransferResult {
            size_bytes: metric.bytes_transferred(),
            output: Delivered::File(destination),
            elapsed,
            worker_count: ranges.len(),
            clamp,
            metric,
        }))
    }
}

async fn fetch_range(job: RangeJob) -> Result<RangeOutcome> {
    if job.cancel.is_cancelled() {
        return Ok(RangeOutcome::Cancelled);
    }
    debug!(
        url = %job.url,
        index = job.index,
        range = %job.range.header_value(),
        "range worker started"
    );

    let request = job
        .client
        .get(&job.url)
        .header(header::RANGE, job.range.header_value());
    let response = tokio::select! {
        _ = job.cancel.cancelled() => return Ok(RangeOutcome::Cancelled),
        response = http::send(request, &job.url) => response?,
    };

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK if job.whole => {}
        _ => {
            return Err(HaulerError::RangeNotSupported {
                url: job.url.clone(),
            })
        }
    }

    let expected = job.range.len();
    let storage = Storage::file(&job.part_path).await?;
    let mut metric = TransferMetric::new(Some(expected), expected, job.time_unit);
    let source = http::body_reader(response).take(expected);

    let outcome = StreamPump::new(job.chunk_size, &job.cancel)
        .with_events(job.events.as_ref())
        .for_worker(job.index)
        .pump(source, storage, &mut metric)
        .await?;

    match outcome {
        PumpOutcome::Cancelled => Ok(RangeOutcome::Cancelled),
        PumpOutcome::Completed(_) if metric.bytes_transferred() != expected => {
            remove_if_exists(&job.part_path).await?;
            Err(HaulerError::Incomplete {
                expected,
                received: metric.bytes_transferred(),
            })
        }
        PumpOutcome::Completed(_) => Ok(RangeOutcome::Done(metric)),
    }
}

/// `<destination>.part<index>`
pub(crate) fn part_path(destination: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(format!(".part{index}"));
    PathBuf::from(name)
}

/// Appends the parts to `destination` in order, deleting each one once it is
/// copied.
async fn merge_parts(destination: &Path, parts: &[PathBuf]) -> Result<()> {
    let mut output = File::create(destination)
        .await
        .map_err(|e| HaulerError::storage(destination, e))?;

    for part in parts {
        let mut input = File::open(part)
            .await
            .map_err(|e| HaulerError::storage(part, e))?;
        io::copy(&mut input, &mut output)
            .await
            .map_err(|e| HaulerError::storage(destination, e))?;
        drop(input);
        remove_if_exists(part).await?;
    }

    output
        .flush()
        .await
        .map_err(|e| HaulerError::storage(destination, e))?;
    output
        .sync_all()
        .await
        .map_err(|e| HaulerError::storage(destination, e))?;
    debug!(destination = %destination.display(), parts = parts.len(), "parts merged");
    Ok(())
}

async fn remove_leftovers(parts: &[PathBuf], destination: Option<&Path>) {
    for path in parts.iter().map(PathBuf::as_path).chain(destination) {
        if let Err(e) = remove_if_exists(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove leftover file");
        }
    }
}
