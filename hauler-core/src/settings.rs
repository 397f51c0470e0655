//! User settings, stored as TOML under `~/.config/hauler/config.toml`.
//!
//! The engine only reads these once, when a
//! [`Downloader`](crate::downloader::Downloader) is built.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{metric::TimeUnit, pump::DEFAULT_CHUNK_SIZE};

pub const DEFAULT_MAX_THREADS: usize = 4;
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 4;
/// 1 GB.
pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 1_000_000_000;

/// Defaults the engine asks its host for.
pub trait SettingsProvider {
    fn max_threads(&self) -> usize;
    fn max_parallel_downloads(&self) -> usize;
    fn download_folder(&self) -> PathBuf;
}

/// Tunables fixed for the lifetime of one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on bytes fetched per resource. Larger declared lengths are
    /// clamped to it; unknown lengths assume it.
    pub max_download_size: u64,
    /// Bytes per copy-loop iteration.
    pub chunk_size: usize,
    /// Memory fetches at or above this size are written to disk instead.
    pub memory_threshold: u64,
    pub time_unit: TimeUnit,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_threshold: DEFAULT_MAX_DOWNLOAD_SIZE,
            time_unit: TimeUnit::Seconds,
            user_agent: concat!("hauler/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Range workers per parallel fetch.
    pub max_threads: usize,
    /// Files fetched at once by a batch.
    pub max_parallel_downloads: usize,
    pub download_folder: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_threads: DEFAULT_MAX_THREADS,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            download_folder: default_download_folder(),
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl SettingsProvider for Settings {
    fn max_threads(&self) -> usize {
        self.max_threads
    }

    fn max_parallel_downloads(&self) -> usize {
        self.max_parallel_downloads
    }

    fn download_folder(&self) -> PathBuf {
        self.download_folder.clone()
    }
}

/// `~/.local/share/hauler/downloads`, or `./downloads` when no home is known.
pub fn default_download_folder() -> PathBuf {
    xdg::BaseDirectories::with_prefix("hauler")
        .map(|dirs| dirs.get_data_home().join("downloads"))
        .unwrap_or_else(|_| PathBuf::from("downloads"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hauler")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Loads the settings file, writing the defaults first if there is none.
pub fn load_or_init() -> Result<Settings> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        save_at(path, &settings)?;
        tracing::info!("created default settings at {}", path.display());
        return Ok(settings);
    }

    let data = fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&data)?;
    Ok(settings)
}

pub fn save_at(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, settings.to_toml()?)?;
    Ok(())
}
