use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::models::segment::Segment;
use crate::models::state::SessionState;
use crate::models::stream_kind::StreamKind;

/// Event delegate for recording session notifications.
///
/// Methods are called from whichever thread caused the event (the caller of
/// a lifecycle operation, or a capture thread for stream errors).
/// Implementations should marshal to a UI thread if needed and must not call
/// back into the session.
pub trait SessionDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: SessionState);

    /// Called when a segment is sealed (on pause, stop or cancel).
    fn on_segment_sealed(&self, segment: &Segment);

    /// Called when a single stream fails while the session keeps running.
    fn on_stream_error(&self, kind: StreamKind, error: &CaptureError);

    /// Called when `stop` completes, including partial stops.
    fn on_recording_finished(&self, result: &RecordingResult);
}
