use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stream_kind::StreamKind;

/// One stream's output file within a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentArtifact {
    pub kind: StreamKind,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub chunk_count: u64,
    /// SHA-256 hex digest of the bytes written.
    pub checksum: String,
    /// A write or flush failed; the file is truncated at the failure point.
    pub write_failed: bool,
}

impl SegmentArtifact {
    /// Zero-byte media means the stream captured nothing and must be treated
    /// as a capture failure, not valid empty content.
    pub fn is_empty(&self) -> bool {
        self.bytes_written == 0
    }
}

/// A sealed, time-bounded unit of recorded output.
///
/// Offsets are seconds since the session started, on a monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub start_offset_secs: f64,
    pub end_offset_secs: f64,
    pub artifacts: Vec<SegmentArtifact>,
}

impl Segment {
    pub fn duration_secs(&self) -> f64 {
        self.end_offset_secs - self.start_offset_secs
    }

    pub fn artifact(&self, kind: StreamKind) -> Option<&SegmentArtifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    /// Whether any artifact in this segment hit a write failure.
    pub fn is_partial(&self) -> bool {
        self.artifacts.iter().any(|a| a.write_failed)
    }
}
