use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::stream::{self, StreamExt};
use reqwest::{header, Client};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    errors::{HaulerError, Result},
    event::{publish, EventSender, FetchState, TransferEvent},
    http::{self, DownloadMeta},
    metric::TransferMetric,
    pump::{PumpOutcome, StreamPump},
    resolver::{DefaultPathResolver, PathResolver},
    result::{SizeClamp, TransferOutcome, TransferResult},
    settings::{EngineConfig, SettingsProvider},
    storage::Storage,
};

/// Where a single fetch should put the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Destination {
    /// Hand the body back as `Delivered::Bytes`, unless it is too large for
    /// memory.
    #[default]
    Memory,
    File {
        file_name: Option<String>,
        folder: Option<PathBuf>,
    },
}

impl Destination {
    pub fn file() -> Self {
        Destination::File {
            file_name: None,
            folder: None,
        }
    }
}

/// Entry point of the engine. Holds the HTTP client and the settings read at
/// construction; every fetch gets its own metric, pump and sink.
#[derive(Clone)]
pub struct Downloader {
    pub(crate) client: Client,
    pub(crate) config: EngineConfig,
    pub(crate) max_threads: usize,
    pub(crate) max_parallel_downloads: usize,
    pub(crate) resolver: Arc<dyn PathResolver>,
}

impl Downloader {
    /// Builds the engine. The client has no request timeout: a caller that
    /// wants a deadline cancels the token from a timer.
    pub fn new(config: EngineConfig, settings: &dyn SettingsProvider) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(HaulerError::Client)?;

        let config = EngineConfig {
            max_download_size: config.max_download_size.max(1),
            chunk_size: config.chunk_size.max(1),
            ..config
        };

        Ok(Downloader {
            client,
            config,
            max_threads: settings.max_threads().max(1),
            max_parallel_downloads: settings.max_parallel_downloads().max(1),
            resolver: Arc::new(DefaultPathResolver::new(settings.download_folder())),
        })
    }

    pub fn with_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn max_parallel_downloads(&self) -> usize {
        self.max_parallel_downloads
    }

    /// Fetches `url` over a single connection.
    pub async fn fetch(
        &self,
        url: &str,
        destination: Destination,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<TransferOutcome> {
        self.fetch_single(url, destination, cancel, events, 0).await
    }

    pub async fn fetch_bytes(
        &self,
        url: &str,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<TransferOutcome> {
        self.fetch(url, Destination::Memory, cancel, events).await
    }

    pub async fn fetch_to_file(
        &self,
        url: &str,
        file_name: Option<&str>,
        folder: Option<&Path>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<TransferOutcome> {
        let destination = Destination::File {
            file_name: file_name.map(str::to_string),
            folder: folder.map(Path::to_path_buf),
        };
        self.fetch(url, destination, cancel, events).await
    }

    /// Fetches every url into `folder`, at most `max_parallel_downloads` at a
    /// time. Results come back in completion order; the worker index in
    /// published events is the url's position in `urls`.
    ///
    /// Output paths are picked in url order before anything starts, so two
    /// urls ending in the same name land in `name` and `name (1)`.
    pub async fn fetch_batch(
        &self,
        urls: Vec<String>,
        folder: Option<&Path>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Vec<(String, Result<TransferOutcome>)> {
        let paths = self.batch_paths(&urls, folder);
        stream::iter(urls.into_iter().zip(paths).enumerate())
            .map(|(index, (url, path))| async move {
                let outcome = match path {
                    Ok(path) => {
                        let destination = Destination::File {
                            file_name: path
                                .file_name()
                                .map(|name| name.to_string_lossy().into_owned()),
                            folder: path.parent().map(Path::to_path_buf),
                        };
                        self.fetch_single(&url, destination, cancel, events, index)
                            .await
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "no output path for batch entry");
                        Err(e)
                    }
                };
                (url, outcome)
            })
            .buffer_unordered(self.max_parallel_downloads)
            .collect()
            .await
    }

    fn batch_paths(&self, urls: &[String], folder: Option<&Path>) -> Vec<Result<PathBuf>> {
        let mut taken = HashSet::new();
        urls.iter()
            .map(|url| {
                let path = self.resolver.resolve(url, None, folder)?;
                Ok(unique_path(&path, &mut taken))
            })
            .collect()
    }

    async fn fetch_single(
        &self,
        url: &str,
        destination: Destination,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
        worker: usize,
    ) -> Result<TransferOutcome> {
        transition(events, url, FetchState::Idle);
        let outcome = self
            .run_single(url, destination, cancel, events, worker)
            .await;

        match &outcome {
            Ok(TransferOutcome::Completed(result)) => {
                info!(
                    url,
                    bytes = result.size_bytes,
                    elapsed = ?result.elapsed,
                    clamped = result.was_clamped(),
                    "fetch completed"
                );
                transition(events, url, FetchState::Completed);
            }
            Ok(TransferOutcome::Cancelled) => transition(events, url, FetchState::Cancelled),
            Err(e) => {
                warn!(url, error = %e, "fetch failed");
                transition(events, url, FetchState::Failed);
            }
        }
        outcome
    }

    async fn run_single(
        &self,
        url: &str,
        destination: Destination,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
        worker: usize,
    ) -> Result<TransferOutcome> {
        Url::parse(url)?;
        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }

        transition(events, url, FetchState::ProbingSize);
        let probed = tokio::select! {
            _ = cancel.cancelled() => return Ok(TransferOutcome::Cancelled),
            probed = http::probe(&self.client, url) => probed,
        };
        let meta = match probed {
            Ok(meta) => meta,
            Err(e) => {
                warn!(url, error = %e, "size probe failed, length treated as unknown");
                DownloadMeta::default()
            }
        };

        let ceiling = self.config.max_download_size;
        let declared = meta.content_length.filter(|&n| n > 0);
        let (known, clamp) = match declared {
            Some(declared) => {
                let (len, clamp) = clamp_to_ceiling(declared, ceiling);
                (Some(len), clamp)
            }
            None => (None, None),
        };
        if let Some(clamp) = clamp {
            warn!(
                url,
                declared = clamp.declared,
                ceiling = clamp.ceiling,
                "declared length exceeds ceiling, clamping"
            );
        }
        let len = known.unwrap_or(ceiling);

        let storage = self
            .open_sink(url, destination, known, meta.file_name.as_deref())
            .await?;

        transition(events, url, FetchState::Fetching);
        let mut request = self.client.get(url);
        if clamp.is_some() {
            request = request.header(header::RANGE, format!("bytes=0-{}", len - 1));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                storage.discard_quietly().await;
                return Ok(TransferOutcome::Cancelled);
            }
            response = http::send(request, url) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                storage.discard_quietly().await;
                return Err(e);
            }
        };

        let source = http::body_reader(response).take(len);
        let mut metric = TransferMetric::new(known, ceiling, self.config.time_unit);
        let outcome = StreamPump::new(self.config.chunk_size, cancel)
            .with_events(events)
            .for_worker(worker)
            .pump(source, storage, &mut metric)
            .await?;

        Ok(match outcome {
            PumpOutcome::Cancelled => TransferOutcome::Cancelled,
            PumpOutcome::Completed(output) => TransferOutcome::Completed(TransferResult {
                size_bytes: metric.bytes_transferred(),
                output,
                elapsed: metric.elapsed(),
                worker_count: 1,
                clamp,
                metric,
            }),
        })
    }

    async fn open_sink(
        &self,
        url: &str,
        destination: Destination,
        known_len: Option<u64>,
        suggested_name: Option<&str>,
    ) -> Result<Storage> {
        match destination {
            Destination::Memory => match known_len {
                Some(len) if len >= self.config.memory_threshold => {
                    let path = self.resolver.resolve(url, suggested_name, None)?;
                    debug!(
                        url,
                        len,
                        path = %path.display(),
                        "too large for memory, writing to disk"
                    );
                    Storage::file(&path).await
                }
                _ => Ok(Storage::memory(known_len.unwrap_or(0))),
            },
            Destination::File { file_name, folder } => {
                let name = file_name.as_deref().or(suggested_name);
                let path = self.resolver.resolve(url, name, folder.as_deref())?;
                debug!(url, path = %path.display(), "writing to file");
                Storage::file(&path).await
            }
        }
    }
}

/// Caps a declared length at the ceiling and records when it had to.
pub(crate) fn clamp_to_ceiling(declared: u64, ceiling: u64) -> (u64, Option<SizeClamp>) {
    if declared > ceiling {
        (ceiling, Some(SizeClamp { declared, ceiling }))
    } else {
        (declared, None)
    }
}

/// Returns `path`, or `stem (n).ext` with the smallest free `n`, and marks
/// the result as taken.
fn unique_path(path: &Path, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let mut candidate = path.to_path_buf();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{stem} ({n}).{}", ext.to_string_lossy()),
            None => format!("{stem} ({n})"),
        };
        candidate = path.with_file_name(name);
        n += 1;
    }
    candidate
}

pub(crate) fn transition(events: Option<&EventSender>, url: &str, state: FetchState) {
    debug!(url, ?state, "state changed");
    publish(events, TransferEvent::State(state));
}
