use std::{path::PathBuf, time::Duration};

use crate::metric::TransferMetric;

/// Where the bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl Delivered {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Delivered::File(path) => Some(path),
            Delivered::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Delivered::File(_) => None,
            Delivered::Bytes(bytes) => Some(bytes),
        }
    }
}

/// The server declared more than the engine is allowed to fetch; only
/// `ceiling` bytes were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClamp {
    pub declared: u64,
    pub ceiling: u64,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub size_bytes: u64,
    pub output: Delivered,
    pub elapsed: Duration,
    /// 1 for single fetches.
    pub worker_count: usize,
    pub clamp: Option<SizeClamp>,
    pub metric: TransferMetric,
}

impl TransferResult {
    pub fn was_clamped(&self) -> bool {
        self.clamp.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(TransferResult),
    /// Stopped on request. No partial file is left behind.
    Cancelled,
}

impl TransferOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<TransferResult> {
        match self {
            TransferOutcome::Completed(result) => Some(result),
            TransferOutcome::Cancelled => None,
        }
    }
}
