use super::stream_kind::StreamKind;

/// Per-stream counters for debugging capture sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDiagnostics {
    pub kind: StreamKind,
    pub chunks_received: u64,
    /// Chunks that arrived while suspended, between segments or after shutdown.
    pub chunks_dropped: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub source_errors: u64,
}
