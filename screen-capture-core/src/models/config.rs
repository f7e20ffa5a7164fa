use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::target::TargetRef;

/// Highest frame rate a session accepts.
pub const MAX_FRAME_RATE: u32 = 240;

/// Default bound on waiting for all streams to acknowledge `stop`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a recording session.
///
/// Exactly one of `display_id` / `window_id` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Root directory of the recording (`<output_path>/content/segments/...`).
    pub output_path: PathBuf,

    /// Display to capture.
    pub display_id: Option<u32>,

    /// Window to capture.
    pub window_id: Option<u32>,

    /// Capture system audio alongside video (default: false).
    pub capture_system_audio: bool,

    /// Target video frame rate (default: 30).
    pub frame_rate: u32,
}

impl RecordingConfig {
    pub fn for_display(output_path: impl Into<PathBuf>, display_id: u32) -> Self {
        Self {
            output_path: output_path.into(),
            display_id: Some(display_id),
            ..Default::default()
        }
    }

    pub fn for_window(output_path: impl Into<PathBuf>, window_id: u32) -> Self {
        Self {
            output_path: output_path.into(),
            window_id: Some(window_id),
            ..Default::default()
        }
    }

    pub fn with_system_audio(mut self, enabled: bool) -> Self {
        self.capture_system_audio = enabled;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.output_path.as_os_str().is_empty() {
            return Err("output path must not be empty".into());
        }
        self.target()?;
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(format!(
                "frame rate must be between 1 and {}, got {}",
                MAX_FRAME_RATE, self.frame_rate
            ));
        }
        Ok(())
    }

    /// The selected target. Fails unless exactly one id is set.
    pub fn target(&self) -> Result<TargetRef, String> {
        match (self.display_id, self.window_id) {
            (Some(id), None) => Ok(TargetRef::display(id)),
            (None, Some(id)) => Ok(TargetRef::window(id)),
            (Some(_), Some(_)) => Err("display_id and window_id are mutually exclusive".into()),
            (None, None) => Err("one of display_id or window_id is required".into()),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("."),
            display_id: None,
            window_id: None,
            capture_system_audio: false,
            frame_rate: 30,
        }
    }
}

/// Timeouts bounding every blocking wait of a session.
///
/// Exceeding one turns a graceful path into forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long `start` waits for each stream to acknowledge activation.
    pub start_timeout: Duration,

    /// Deadline for all streams to drain on `stop`.
    pub stop_timeout: Duration,

    /// Deadline for all streams to shut down on `cancel`.
    pub cancel_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            cancel_timeout: Duration::from_secs(10),
        }
    }
}
