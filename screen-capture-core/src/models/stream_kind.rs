use std::fmt;

use serde::{Deserialize, Serialize};

use super::target::TargetKind;

/// Kind of live capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    DisplayVideo,
    WindowVideo,
    SystemAudio,
}

impl StreamKind {
    /// Video stream kind for a target.
    pub fn video_for(target: TargetKind) -> Self {
        match target {
            TargetKind::Display => Self::DisplayVideo,
            TargetKind::Window => Self::WindowVideo,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::DisplayVideo | Self::WindowVideo)
    }

    /// File name of this stream's artifact inside a segment directory.
    ///
    /// The extension names the expected container only. The file holds the
    /// source's chunks as written, which may be raw frames or PCM.
    pub fn artifact_file_name(&self) -> &'static str {
        match self {
            Self::DisplayVideo => "display.mp4",
            Self::WindowVideo => "window.mp4",
            Self::SystemAudio => "system_audio.ogg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisplayVideo => "display-video",
            Self::WindowVideo => "window-video",
            Self::SystemAudio => "system-audio",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
