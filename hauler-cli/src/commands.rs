use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Subcommand;
use hauler_core::{
    event, settings, CancellationToken, Downloader, FileType, Settings, TransferEvent,
    TransferOutcome, TransferResult,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a file over a single connection
    Get {
        #[clap(value_parser)]
        url: String,
        /// Folder to save into (defaults to the configured download folder)
        #[clap(long, short, value_parser)]
        output_dir: Option<PathBuf>,
        /// File name to save as
        #[clap(long, short, value_parser)]
        name: Option<String>,
        /// Keep the body in memory and write it to stdout
        #[clap(long, takes_value = false)]
        memory: bool,
    },
    /// Fetch a file over several ranged connections
    Parallel {
        #[clap(value_parser)]
        url: String,
        #[clap(long, short, value_parser)]
        output_dir: Option<PathBuf>,
        #[clap(long, short, value_parser)]
        name: Option<String>,
        /// Number of ranges (defaults to max_threads from the settings)
        #[clap(long, short, value_parser)]
        threads: Option<usize>,
    },
    /// Fetch several files, max_parallel_downloads at a time
    Batch {
        #[clap(value_parser, required = true)]
        urls: Vec<String>,
        #[clap(long, short, value_parser)]
        output_dir: Option<PathBuf>,
    },
    /// Show the settings file
    Config {
        /// Print the current values too
        #[clap(long, takes_value = false)]
        show: bool,
    },
}

pub async fn handle_get(
    downloader: &Downloader,
    url: String,
    output_dir: Option<PathBuf>,
    name: Option<String>,
    memory: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let (tx, rx) = event::channel();
    let bars = ProgressBars::new();
    let observer = bars.observe(rx);

    let outcome = if memory {
        downloader.fetch_bytes(&url, cancel, Some(&tx)).await
    } else {
        downloader
            .fetch_to_file(
                &url,
                name.as_deref(),
                output_dir.as_deref(),
                cancel,
                Some(&tx),
            )
            .await
    };
    drop(tx);
    let _ = observer.await;

    match outcome? {
        TransferOutcome::Cancelled => bail!("download cancelled"),
        TransferOutcome::Completed(result) => {
            if let Some(bytes) = result.output.bytes() {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(bytes).await?;
                stdout.flush().await?;
            }
            print_summary(&url, &result);
        }
    }
    Ok(())
}

pub async fn handle_parallel(
    downloader: &Downloader,
    url: String,
    output_dir: Option<PathBuf>,
    name: Option<String>,
    threads: Option<usize>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (tx, rx) = event::channel();
    let bars = ProgressBars::new();
    let observer = bars.observe(rx);

    let outcome = downloader
        .fetch_parallel(
            &url,
            name.as_deref(),
            output_dir.as_deref(),
            threads,
            cancel,
            Some(&tx),
        )
        .await;
    drop(tx);
    let _ = observer.await;

    match outcome? {
        TransferOutcome::Cancelled => bail!("download cancelled"),
        TransferOutcome::Completed(result) => print_summary(&url, &result),
    }
    Ok(())
}

pub async fn handle_batch(
    downloader: &Downloader,
    urls: Vec<String>,
    output_dir: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (tx, rx) = event::channel();
    let bars = ProgressBars::new();
    let observer = bars.observe(rx);

    let results = downloader
        .fetch_batch(urls, output_dir.as_deref(), cancel, Some(&tx))
        .await;
    drop(tx);
    let _ = observer.await;

    let mut failed = 0;
    for (url, outcome) in results {
        match outcome {
            Ok(TransferOutcome::Completed(result)) => print_summary(&url, &result),
            Ok(TransferOutcome::Cancelled) => {
                failed += 1;
                eprintln!("{url} : cancelled");
            }
            Err(e) => {
                failed += 1;
                eprintln!("{url} : {e}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} download(s) did not complete");
    }
    Ok(())
}

pub fn handle_config(settings: &Settings, show: bool) -> Result<()> {
    println!("Settings file : {}", settings::config_path()?.display());
    if show {
        print!("{}", settings.to_toml()?);
    }
    Ok(())
}

fn print_summary(url: &str, result: &TransferResult) {
    let target = match result.output.path() {
        Some(path) => path.display().to_string(),
        None => "memory".to_string(),
    };
    let kind = match result.output.path() {
        Some(path) => FileType::from_path(path),
        None => FileType::from_url(url),
    };
    eprintln!(
        "Downloaded {url}\n  Saved to : {target}\n  Type : {kind:?}\n  Size : {size} bytes\n  Time : {elapsed:.2?} ({workers} connection(s))",
        size = result.size_bytes,
        elapsed = result.elapsed,
        workers = result.worker_count,
    );
    if let Some(clamp) = result.clamp {
        eprintln!(
            "  Note : server declared {} bytes, only the first {} were fetched",
            clamp.declared, clamp.ceiling
        );
    }
}

/// One bar per worker, fed from the event queue on its own task.
struct ProgressBars {
    multi: MultiProgress,
    style: ProgressStyle,
}

impl ProgressBars {
    fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{prefix:>4} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        ProgressBars {
            multi: MultiProgress::new(),
            style,
        }
    }

    fn observe(self, rx: event::EventReceiver) -> tokio::task::JoinHandle<()> {
        let mut bars: HashMap<usize, ProgressBar> = HashMap::new();
        event::spawn_observer(rx, move |event| match event {
            TransferEvent::Started {
                worker,
                total_bytes,
            } => {
                let bar = self.multi.add(ProgressBar::new(total_bytes));
                bar.set_style(self.style.clone());
                bar.set_prefix(format!("#{worker}"));
                bar.enable_steady_tick(Duration::from_millis(200));
                bars.insert(worker, bar);
            }
            TransferEvent::Progress { worker, metric } => {
                if let Some(bar) = bars.get(&worker) {
                    bar.set_position(metric.bytes_transferred());
                }
            }
            TransferEvent::WorkerCompleted { worker, metric } => {
                if let Some(bar) = bars.remove(&worker) {
                    bar.set_length(metric.bytes_transferred());
                    bar.finish();
                }
            }
            TransferEvent::State(state) => tracing::debug!(?state, "fetch state"),
        })
    }
}
