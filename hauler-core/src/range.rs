/// Inclusive byte range `[start, end]` of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={start}-{end}", start = self.start, end = self.end)
    }
}

/// Splits `[0, total_bytes - 1]` into `thread_count` contiguous ranges.
///
/// Every range but the last gets `total_bytes / thread_count` bytes; the last
/// one absorbs the remainder. The thread count is capped at `total_bytes` so no
/// range is ever empty, and a thread count of zero counts as one.
pub fn plan_ranges(total_bytes: u64, thread_count: u64) -> Vec<ByteRange> {
    if total_bytes == 0 {
        return Vec::new();
    }
    let thread_count = thread_count.clamp(1, total_bytes);
    let part_size = total_bytes / thread_count;

    (0..thread_count)
        .map(|i| {
            let start = i * part_size;
            let end = if i + 1 != thread_count {
                start + part_size - 1
            } else {
                total_bytes - 1
            };
            ByteRange::new(start, end)
        })
        .collect()
}
