//! On-disk layout of a recording.
//!
//! ```text
//! <root>/
//!   recording-meta.json
//!   content/
//!     segments/
//!       segment-0/
//!         display.mp4        (or window.mp4)
//!         system_audio.ogg   (only when audio was requested)
//!       segment-1/
//!         ...
//! ```
//!
//! Artifact names are fixed per stream kind. Contents are whatever the
//! source pushed, unframed; see the backend for the actual payload format.

use std::path::{Path, PathBuf};

use crate::models::stream_kind::StreamKind;

pub const CONTENT_DIR: &str = "content";
pub const SEGMENTS_DIR: &str = "segments";
pub const SEGMENT_DIR_PREFIX: &str = "segment-";
pub const METADATA_FILE_NAME: &str = "recording-meta.json";

pub fn content_dir(root: &Path) -> PathBuf {
    root.join(CONTENT_DIR)
}

pub fn segments_dir(root: &Path) -> PathBuf {
    content_dir(root).join(SEGMENTS_DIR)
}

pub fn segment_dir(root: &Path, index: u32) -> PathBuf {
    segments_dir(root).join(format!("{}{}", SEGMENT_DIR_PREFIX, index))
}

pub fn artifact_path(root: &Path, index: u32, kind: StreamKind) -> PathBuf {
    segment_dir(root, index).join(kind.artifact_file_name())
}

pub fn metadata_path(root: &Path) -> PathBuf {
    root.join(METADATA_FILE_NAME)
}

/// Parse `segment-<n>` into `n`.
pub fn parse_segment_index(dir_name: &str) -> Option<u32> {
    dir_name.strip_prefix(SEGMENT_DIR_PREFIX)?.parse().ok()
}

/// Map an artifact file name back to its stream kind.
pub fn stream_kind_for_file(file_name: &str) -> Option<StreamKind> {
    [StreamKind::DisplayVideo, StreamKind::WindowVideo, StreamKind::SystemAudio]
        .into_iter()
        .find(|k| k.artifact_file_name() == file_name)
}
