//! Read-side view of a recording directory for downstream consumers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::models::stream_kind::StreamKind;
use crate::storage::layout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactListing {
    pub kind: StreamKind,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentListing {
    pub index: u32,
    pub dir: PathBuf,
    pub artifacts: Vec<ArtifactListing>,
}

impl SegmentListing {
    pub fn video(&self) -> Option<&ArtifactListing> {
        self.artifacts.iter().find(|a| a.kind.is_video())
    }

    pub fn has_system_audio(&self) -> bool {
        self.artifacts.iter().any(|a| a.kind == StreamKind::SystemAudio)
    }
}

/// Data-integrity problems a consumer must not treat as valid content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    MissingVideo { segment: u32 },
    EmptyArtifact { segment: u32, kind: StreamKind },
}

/// List `content/segments/segment-*` under `root`, ordered by index.
///
/// Unknown files and directories are ignored. A recording without a
/// segments directory yields an empty list.
pub fn inspect_recording(root: &Path) -> Result<Vec<SegmentListing>, CaptureError> {
    let segments_dir = layout::segments_dir(root);
    if !segments_dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&segments_dir)
        .map_err(|e| CaptureError::StorageError(format!("failed to read {}: {}", segments_dir.display(), e)))?;

    let mut segments = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        let Some(index) = entry.file_name().to_str().and_then(layout::parse_segment_index) else {
            continue;
        };
        if !dir.is_dir() {
            continue;
        }
        segments.push(SegmentListing {
            index,
            artifacts: list_artifacts(&dir)?,
            dir,
        });
    }

    segments.sort_by_key(|s| s.index);
    Ok(segments)
}

fn list_artifacts(dir: &Path) -> Result<Vec<ArtifactListing>, CaptureError> {
    let entries =
        fs::read_dir(dir).map_err(|e| CaptureError::StorageError(format!("failed to read {}: {}", dir.display(), e)))?;

    let mut artifacts: Vec<ArtifactListing> = entries
        .flatten()
        .filter_map(|entry| {
            let kind = entry.file_name().to_str().and_then(layout::stream_kind_for_file)?;
            let size_bytes = entry.metadata().ok()?.len();
            Some(ArtifactListing {
                kind,
                path: entry.path(),
                size_bytes,
            })
        })
        .collect();
    artifacts.sort_by_key(|a| a.kind);
    Ok(artifacts)
}

/// Every segment must hold a non-empty video artifact; any zero-byte
/// artifact is a capture failure.
pub fn integrity_issues(segments: &[SegmentListing]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    for segment in segments {
        if segment.video().is_none() {
            issues.push(IntegrityIssue::MissingVideo { segment: segment.index });
        }
        for artifact in &segment.artifacts {
            if artifact.size_bytes == 0 {
                issues.push(IntegrityIssue::EmptyArtifact {
                    segment: segment.index,
                    kind: artifact.kind,
                });
            }
        }
    }
    issues
}
