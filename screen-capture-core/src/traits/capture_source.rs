use crate::models::error::CaptureError;
use crate::models::stream_kind::StreamKind;
use crate::models::target::CaptureTarget;
use crate::stream::sink::ChunkSink;

/// One OS-level capture resource (a display grabber, a window grabber, an
/// audio loopback).
///
/// Implemented by:
/// - `GdiFrameCapture` (Windows display/window video)
/// - `WasapiLoopbackCapture` (Windows system audio)
///
/// Every method is called from the owning `CaptureStream`'s worker thread,
/// never concurrently. Any of them may block; the stream bounds how long the
/// session waits. Sources never retry internally.
pub trait CaptureSource: Send {
    /// Begin delivering timestamped encoded chunks into `sink`.
    ///
    /// The source keeps a clone of the sink and may push from its own
    /// threads until `stop` or `abort` returns.
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError>;

    /// Pause production without releasing the OS resource.
    fn suspend(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Continue production after `suspend`.
    fn resume(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Drain pending data into the sink and release the resource.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the resource immediately, discarding anything pending.
    fn abort(&mut self) {}
}

/// Acquires capture sources for a resolved target.
pub trait SourceFactory: Send + Sync {
    /// Acquire (but do not start) the source for `kind`.
    ///
    /// `frame_rate` only applies to video kinds.
    fn acquire(
        &self,
        kind: StreamKind,
        target: &CaptureTarget,
        frame_rate: u32,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}
