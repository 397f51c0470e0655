#![allow(dead_code)]

pub mod range_server;

use std::path::Path;

use hauler_core::{Downloader, EngineConfig, Settings};

/// Engine whose default download folder is `dir`.
pub fn downloader(dir: &Path, config: EngineConfig) -> Downloader {
    let settings = Settings {
        download_folder: dir.to_path_buf(),
        ..Settings::default()
    };
    Downloader::new(config, &settings).unwrap()
}

pub fn body(len: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(len).collect()
}

/// Names of everything directly inside `dir`, sorted.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
