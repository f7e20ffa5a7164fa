use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::diagnostics::StreamDiagnostics;
use crate::models::error::CaptureError;
use crate::models::stream_kind::StreamKind;
use crate::storage::segment_writer::SegmentWriter;
use crate::traits::session_delegate::SessionDelegate;

/// The open segment, shared between the session and every stream's sink.
/// `None` while paused or after shutdown.
pub(crate) type SharedWriter = Arc<Mutex<Option<SegmentWriter>>>;

/// One timestamped, already-encoded piece of media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Presentation time relative to the source's own start.
    pub pts: Duration,
    pub data: Vec<u8>,
}

impl MediaChunk {
    pub fn new(pts: Duration, data: Vec<u8>) -> Self {
        Self { pts, data }
    }
}

/// The first terminal signal a stream receives. Later ones are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSignal {
    /// The source ended on its own (e.g. the captured window closed).
    EndOfStream,
    /// The session asked the stream to drain and close.
    Finish,
    /// The stream was torn down without draining.
    Abort,
}

impl TerminalSignal {
    fn code(self) -> u8 {
        match self {
            Self::EndOfStream => 1,
            Self::Finish => 2,
            Self::Abort => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::EndOfStream),
            2 => Some(Self::Finish),
            3 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// State shared between a `CaptureStream` and the sinks handed to its source.
pub(crate) struct StreamShared {
    kind: StreamKind,
    accepting: AtomicBool,
    closed: AtomicBool,
    terminal: AtomicU8,
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    bytes_written: AtomicU64,
    write_failures: AtomicU64,
    source_errors: AtomicU64,
}

impl StreamShared {
    pub(crate) fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            accepting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            terminal: AtomicU8::new(0),
            chunks_received: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Permanently stop routing chunks to disk.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub(crate) fn accepts(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.accepting.load(Ordering::SeqCst)
    }

    /// Record `signal` if no terminal signal was seen yet. Returns whether it won.
    pub(crate) fn signal_terminal(&self, signal: TerminalSignal) -> bool {
        self.terminal
            .compare_exchange(0, signal.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn terminal(&self) -> Option<TerminalSignal> {
        TerminalSignal::from_code(self.terminal.load(Ordering::SeqCst))
    }

    pub(crate) fn diagnostics(&self) -> StreamDiagnostics {
        StreamDiagnostics {
            kind: self.kind,
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}

/// Where a `CaptureSource` delivers its output.
///
/// Cheap to clone; sources may push from any thread. Chunks pushed while the
/// stream is suspended, between segments, or after shutdown are counted and
/// dropped. Write failures are local to this stream.
#[derive(Clone)]
pub struct ChunkSink {
    shared: Arc<StreamShared>,
    writer: SharedWriter,
    delegate: Option<Arc<dyn SessionDelegate>>,
}

impl ChunkSink {
    pub(crate) fn new(
        shared: Arc<StreamShared>,
        writer: SharedWriter,
        delegate: Option<Arc<dyn SessionDelegate>>,
    ) -> Self {
        Self {
            shared,
            writer,
            delegate,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    /// Whether pushed chunks would currently be persisted. Sources may use
    /// this to skip encoding work while suspended.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepts()
    }

    /// Persist a chunk into the open segment.
    pub fn push(&self, chunk: MediaChunk) {
        let kind = self.shared.kind;
        self.shared.chunks_received.fetch_add(1, Ordering::Relaxed);

        if !self.shared.accepts() {
            self.shared.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let result = {
            let mut guard = self.writer.lock();
            match guard.as_mut() {
                Some(writer) if !writer.has_failed(kind) => writer.append(kind, &chunk),
                _ => {
                    self.shared.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        };

        match result {
            Ok(()) => {
                self.shared
                    .bytes_written
                    .fetch_add(chunk.data.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.shared.write_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to write {} chunk: {}", kind, e);
                if let Some(ref delegate) = self.delegate {
                    delegate.on_stream_error(kind, &e);
                }
            }
        }
    }

    /// The source ended on its own.
    ///
    /// Ignored if the session already asked the stream to finish or abort.
    pub fn end_of_stream(&self) {
        if self.shared.signal_terminal(TerminalSignal::EndOfStream) {
            log::info!("{} stream reached end of stream", self.shared.kind);
        } else {
            log::debug!(
                "{} stream end of stream ignored, already {:?}",
                self.shared.kind,
                self.shared.terminal()
            );
        }
    }

    /// Report a failure that does not end the session.
    pub fn report_error(&self, error: CaptureError) {
        self.shared.source_errors.fetch_add(1, Ordering::Relaxed);
        log::warn!("{} stream error: {}", self.shared.kind, error);
        if let Some(ref delegate) = self.delegate {
            delegate.on_stream_error(self.shared.kind, &error);
        }
    }
}
