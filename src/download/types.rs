// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download buffer and progress types.

/// Append-only sequence of received byte ranges.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    segments: Vec<Vec<u8>>,
    loaded: u64,
    total: Option<u64>,
}

impl ByteBuffer {
    /// Create an empty buffer. `total` is the declared length, if known.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            segments: Vec::new(),
            loaded: 0,
            total,
        }
    }

    pub fn append(&mut self, segment: Vec<u8>) {
        if segment.is_empty() {
            return;
        }
        self.loaded += segment.len() as u64;
        self.segments.push(segment);
    }

    /// Bytes received so far.
    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    /// Declared total length.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Progress snapshot for the current state of the buffer.
    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress::new(self.loaded, self.total)
    }

    /// Concatenate all segments.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.segments.len() == 1 {
            return self.segments.pop().unwrap_or_default();
        }
        let mut out = Vec::with_capacity(self.loaded as usize);
        for segment in self.segments {
            out.extend_from_slice(&segment);
        }
        out
    }
}

/// Byte-count progress for one download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
    /// 0-100, present only when `total` is known and non-zero.
    pub percent: Option<f64>,
}

impl DownloadProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        let percent = total.filter(|t| *t > 0).map(|t| {
            ((loaded as f64 / t as f64) * 100.0).min(100.0)
        });
        Self {
            loaded,
            total,
            percent,
        }
    }

    /// Fraction in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.percent.map(|p| p / 100.0)
    }

    /// Human-readable byte count, e.g. "1.5 MB / 3.0 MB".
    pub fn size_string(&self) -> String {
        match self.total {
            Some(total) => format!("{} / {}", format_bytes(self.loaded), format_bytes(total)),
            None => format_bytes(self.loaded),
        }
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
