use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::segment::{Segment, SegmentArtifact};
use crate::models::stream_kind::StreamKind;
use crate::storage::layout;
use crate::stream::sink::MediaChunk;

struct ArtifactWriter {
    kind: StreamKind,
    path: PathBuf,
    file: BufWriter<File>,
    hasher: Sha256,
    bytes_written: u64,
    chunk_count: u64,
    write_failed: bool,
}

impl ArtifactWriter {
    fn create(kind: StreamKind, path: PathBuf) -> Result<Self, CaptureError> {
        let file = File::create(&path).map_err(|e| {
            CaptureError::StorageError(format!("failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self {
            kind,
            path,
            file: BufWriter::new(file),
            hasher: Sha256::new(),
            bytes_written: 0,
            chunk_count: 0,
            write_failed: false,
        })
    }

    fn finish(mut self) -> SegmentArtifact {
        if !self.write_failed {
            if let Err(e) = self.file.flush().and_then(|_| self.file.get_ref().sync_all()) {
                log::error!("Failed to flush {}: {}", self.path.display(), e);
                self.write_failed = true;
            }
        }
        SegmentArtifact {
            kind: self.kind,
            path: self.path,
            bytes_written: self.bytes_written,
            chunk_count: self.chunk_count,
            checksum: hex_encode(&self.hasher.finalize()),
            write_failed: self.write_failed,
        }
    }
}

/// Streaming writer for one open segment.
///
/// Owns one artifact file per stream kind active during the segment. A write
/// failure only poisons that stream's artifact; the others keep going.
/// `seal` consumes the writer, so a sealed segment can never be reopened.
///
/// Checksums are computed incrementally while writing, so sealing never
/// re-reads the media.
pub struct SegmentWriter {
    index: u32,
    epoch: Instant,
    opened: Instant,
    started_at: DateTime<Utc>,
    artifacts: Vec<ArtifactWriter>,
}

impl SegmentWriter {
    /// Create `segment-<index>/` under `root` with one empty file per kind.
    ///
    /// `epoch` is the session start; segment offsets are measured from it.
    pub fn open(root: &Path, index: u32, kinds: &[StreamKind], epoch: Instant) -> Result<Self, CaptureError> {
        let dir = layout::segment_dir(root, index);
        fs::create_dir_all(&dir).map_err(|e| {
            CaptureError::StorageError(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let artifacts = kinds
            .iter()
            .map(|&kind| ArtifactWriter::create(kind, dir.join(kind.artifact_file_name())))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Opened segment {} at {}", index, dir.display());

        Ok(Self {
            index,
            epoch,
            opened: Instant::now(),
            started_at: Utc::now(),
            artifacts,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Seconds since this segment was opened.
    pub fn elapsed_secs(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    /// Whether `kind`'s artifact already hit a write failure.
    pub fn has_failed(&self, kind: StreamKind) -> bool {
        self.artifacts.iter().any(|a| a.kind == kind && a.write_failed)
    }

    /// Append an encoded chunk to `kind`'s artifact.
    ///
    /// Fails with `StreamWriteFailed` if the segment has no artifact for
    /// `kind`, if the write fails, or if an earlier write already failed.
    pub fn append(&mut self, kind: StreamKind, chunk: &MediaChunk) -> Result<(), CaptureError> {
        let index = self.index;
        let artifact = self
            .artifacts
            .iter_mut()
            .find(|a| a.kind == kind)
            .ok_or_else(|| CaptureError::StreamWriteFailed {
                kind,
                message: format!("segment {} has no {} artifact", index, kind),
            })?;

        if artifact.write_failed {
            return Err(CaptureError::StreamWriteFailed {
                kind,
                message: "artifact already failed".into(),
            });
        }

        if let Err(e) = artifact.file.write_all(&chunk.data) {
            artifact.write_failed = true;
            return Err(CaptureError::StreamWriteFailed {
                kind,
                message: format!("write to {} failed: {}", artifact.path.display(), e),
            });
        }

        artifact.hasher.update(&chunk.data);
        artifact.bytes_written += chunk.data.len() as u64;
        artifact.chunk_count += 1;
        Ok(())
    }

    /// Point `kind`'s artifact at a read-only handle so every later write
    /// fails the way a full or vanished disk would.
    #[cfg(test)]
    pub(crate) fn break_artifact(&mut self, kind: StreamKind) {
        let artifact = self
            .artifacts
            .iter_mut()
            .find(|a| a.kind == kind)
            .expect("artifact for kind");
        let read_only = File::open(&artifact.path).expect("reopen artifact");
        // Unbuffered, so the failure surfaces on the next append.
        artifact.file = BufWriter::with_capacity(0, read_only);
    }

    /// Flush and close every artifact, stamp the end time and return the
    /// immutable segment record.
    pub fn seal(self) -> Segment {
        let start_offset_secs = self.opened.saturating_duration_since(self.epoch).as_secs_f64();
        let end_offset_secs = start_offset_secs + self.opened.elapsed().as_secs_f64();
        let artifacts: Vec<SegmentArtifact> = self.artifacts.into_iter().map(ArtifactWriter::finish).collect();

        log::info!(
            "Sealed segment {} ({:.3}s, {} bytes)",
            self.index,
            end_offset_secs - start_offset_secs,
            artifacts.iter().map(|a| a.bytes_written).sum::<u64>()
        );

        Segment {
            index: self.index,
            started_at: self.started_at,
            ended_at: Utc::now(),
            start_offset_secs,
            end_offset_secs,
            artifacts,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
