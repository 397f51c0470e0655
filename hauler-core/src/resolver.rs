//! Turns `(url, file name?, folder?)` into the absolute path a file fetch
//! writes to.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use url::Url;

use crate::errors::{HaulerError, Result};

pub const FALLBACK_FILE_NAME: &str = "download.bin";

pub trait PathResolver: Send + Sync {
    /// Returns an absolute path whose parent directory exists.
    fn resolve(&self, url: &str, file_name: Option<&str>, folder: Option<&Path>)
        -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct DefaultPathResolver {
    default_folder: PathBuf,
}

impl DefaultPathResolver {
    pub fn new(default_folder: impl Into<PathBuf>) -> Self {
        DefaultPathResolver {
            default_folder: default_folder.into(),
        }
    }
}

impl PathResolver for DefaultPathResolver {
    fn resolve(
        &self,
        url: &str,
        file_name: Option<&str>,
        folder: Option<&Path>,
    ) -> Result<PathBuf> {
        let folder = folder.unwrap_or(self.default_folder.as_path());
        fs::create_dir_all(folder).map_err(|e| HaulerError::storage(folder, e))?;

        let from_url = file_name_from_url(url)?;
        let name = match file_name.map(sanitize_file_name) {
            Some(name) if !name.is_empty() => reconcile_extension(name, from_url.as_deref()),
            _ => from_url.unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
        };

        let path = folder.join(name);
        if path.is_absolute() {
            return Ok(path);
        }
        let cwd = env::current_dir().map_err(|e| HaulerError::storage(&path, e))?;
        Ok(cwd.join(path))
    }
}

/// Last non-empty path segment of `url`, sanitized. Query and fragment never
/// take part.
pub fn file_name_from_url(url: &str) -> Result<Option<String>> {
    let parsed = Url::parse(url)?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(sanitize_file_name)
        .filter(|s| !s.is_empty());
    Ok(name)
}

/// Replaces characters that are not allowed in file names on common
/// platforms and trims leading/trailing dots and spaces.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim_matches(|c| c == '.' || c == ' ').to_string()
}

/// A caller name without an extension borrows the one the url shows. An
/// explicit extension always wins.
fn reconcile_extension(name: String, url_name: Option<&str>) -> String {
    if Path::new(&name).extension().is_some() {
        return name;
    }
    match url_name.and_then(|n| Path::new(n).extension()) {
        Some(ext) => format!("{name}.{ext}", ext = ext.to_string_lossy()),
        None => name,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Video,
    Image,
    Pdf,
    Music,
    Archive,
    Document,
    Unknown,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
            None => return FileType::Unknown,
        };
        match ext.as_str() {
            "mp4" | "mpg" | "mpeg" | "avi" | "mov" | "qt" | "wmv" | "mkv" => FileType::Video,
            "gif" | "png" | "jpg" | "jpeg" | "tif" | "jpe" | "bmp" => FileType::Image,
            "pdf" => FileType::Pdf,
            "mp3" | "wma" | "wav" => FileType::Music,
            "zip" | "rar" | "tar" | "gz" | "tgz" => FileType::Archive,
            "docx" | "doc" => FileType::Document,
            _ => FileType::Unknown,
        }
    }

    pub fn from_url(url: &str) -> Self {
        match file_name_from_url(url) {
            Ok(Some(name)) => FileType::from_path(Path::new(&name)),
            _ => FileType::Unknown,
        }
    }
}
