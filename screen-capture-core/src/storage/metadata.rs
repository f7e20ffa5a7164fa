use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingMeta;
use crate::storage::layout;

/// Write recording metadata as a JSON sidecar file.
///
/// Creates `{root}/recording-meta.json` and returns its path.
pub fn write_metadata(metadata: &RecordingMeta, root: &Path) -> Result<PathBuf, CaptureError> {
    let metadata_path = layout::metadata_path(root);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| CaptureError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&metadata_path, json)
        .map_err(|e| CaptureError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(metadata_path)
}

/// Read recording metadata from the JSON sidecar file under `root`.
pub fn read_metadata(root: &Path) -> Result<RecordingMeta, CaptureError> {
    let metadata_path = layout::metadata_path(root);
    let json = fs::read_to_string(&metadata_path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read metadata: {}", e)))?;
    let metadata: RecordingMeta = serde_json::from_str(&json)
        .map_err(|e| CaptureError::StorageError(format!("failed to parse metadata: {}", e)))?;
    Ok(metadata)
}

/// Delete the sidecar if present.
pub fn remove_metadata(root: &Path) -> Result<(), CaptureError> {
    match fs::remove_file(layout::metadata_path(root)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaptureError::StorageError(format!("failed to remove metadata: {}", e))),
    }
}
