use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::RecordingConfig;
use super::segment::Segment;
use super::state::SessionState;
use super::stream_kind::StreamKind;
use super::target::CaptureTarget;

/// Result of a finished session, handed to the delegate after `stop`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub output_path: PathBuf,
    pub duration_secs: f64,
    pub segments: Vec<Segment>,
    /// Streams that missed the shutdown deadline and were force-terminated.
    pub forced_streams: Vec<StreamKind>,
    pub metadata: RecordingMeta,
}

impl RecordingResult {
    pub fn is_partial(&self) -> bool {
        !self.forced_streams.is_empty()
    }
}

/// Metadata stored alongside a recording as `recording-meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub id: String,
    pub created_at: String,
    pub state: SessionState,
    pub config: RecordingConfig,
    pub target: CaptureTarget,
    pub duration_secs: f64,
    pub segments: Vec<Segment>,
    pub forced_streams: Vec<StreamKind>,
}

impl RecordingMeta {
    pub fn new(
        id: &str,
        config: &RecordingConfig,
        target: &CaptureTarget,
        segments: &[Segment],
        forced_streams: &[StreamKind],
    ) -> Self {
        Self {
            id: id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            state: SessionState::Stopped,
            config: config.clone(),
            target: target.clone(),
            duration_secs: segments.iter().map(Segment::duration_secs).sum(),
            segments: segments.to_vec(),
            forced_streams: forced_streams.to_vec(),
        }
    }
}
