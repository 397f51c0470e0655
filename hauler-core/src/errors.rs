use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HaulerError>;

/// Everything that can stop a transfer short of completion.
///
/// A caller-requested abort is not in here: it is reported as
/// [`TransferOutcome::Cancelled`](crate::result::TransferOutcome::Cancelled).
#[derive(Error, Debug)]
pub enum HaulerError {
    /// The server answered with a non-success status.
    #[error("{url} responded with {status}: {body}")]
    Transport {
        url: String,
        status: u16,
        body: String,
    },

    /// The request could not be sent or its headers never arrived.
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body broke off while it was being read.
    #[error("reading response body failed")]
    Read(#[source] io::Error),

    /// Parallel mode needs a declared length to plan ranges.
    #[error("{url} did not report a usable content length")]
    LengthUnknown { url: String },

    /// A ranged request came back as a full `200 OK` body.
    #[error("{url} ignored the range request")]
    RangeNotSupported { url: String },

    /// A range finished with fewer bytes than it asked for.
    #[error("expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    /// Local disk failure while writing, merging or cleaning up.
    #[error("storage operation failed on {path}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not build the http client")]
    Client(#[source] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A worker task panicked or was aborted before reporting back.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl HaulerError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HaulerError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        HaulerError::Network {
            url: url.to_string(),
            source,
        }
    }
}
