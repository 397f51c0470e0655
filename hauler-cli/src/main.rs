use std::process;

use clap::Parser;
use commands::{handle_batch, handle_config, handle_get, handle_parallel, Commands};
use hauler_core::{logging, settings, CancellationToken, Downloader};

pub mod commands;

#[derive(Parser)]
#[clap(subcommand_required = true)]
struct Hauler {
    #[clap(subcommand)]
    commands: Commands,
}

#[tokio::main]
async fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    let hauler = Hauler::parse();
    if let Err(e) = run(hauler.commands).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("{e:#}");
        process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let settings = settings::load_or_init()?;

    if let Commands::Config { show } = command {
        return handle_config(&settings, show);
    }

    let downloader = Downloader::new(settings.engine.clone(), &settings)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling, removing partial files...");
            on_interrupt.cancel();
        }
    });

    match command {
        Commands::Get {
            url,
            output_dir,
            name,
            memory,
        } => handle_get(&downloader, url, output_dir, name, memory, &cancel).await,
        Commands::Parallel {
            url,
            output_dir,
            name,
            threads,
        } => handle_parallel(&downloader, url, output_dir, name, threads, &cancel).await,
        Commands::Batch { urls, output_dir } => {
            handle_batch(&downloader, urls, output_dir, &cancel).await
        }
        Commands::Config { .. } => Ok(()),
    }
}
