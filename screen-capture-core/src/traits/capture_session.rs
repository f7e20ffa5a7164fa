use std::path::PathBuf;

use crate::models::config::RecordingConfig;
use crate::models::error::CaptureError;
use crate::models::segment::Segment;
use crate::models::state::SessionState;

/// Lifecycle surface of a recording session.
///
/// All operations take `&self` so a session can be shared across threads;
/// implementations reject overlapping lifecycle calls with
/// `OperationInProgress` instead of queueing them.
pub trait CaptureSession: Send + Sync {
    /// Current session state.
    fn state(&self) -> SessionState;

    /// Validate `config`, acquire streams and open segment 0.
    /// Transitions: idle → recording.
    fn start(&self, config: RecordingConfig) -> Result<(), CaptureError>;

    /// Seal the open segment and suspend streams. Transitions: recording → paused.
    fn pause(&self) -> Result<(), CaptureError>;

    /// Open the next segment and reactivate streams. Transitions: paused → recording.
    fn resume(&self) -> Result<(), CaptureError>;

    /// Finalize the recording and return its root directory.
    /// Transitions: recording/paused → stopping → stopped.
    fn stop(&self) -> Result<PathBuf, CaptureError>;

    /// Shut down and discard all output.
    /// Transitions: recording/paused → cancelling → cancelled.
    fn cancel(&self) -> Result<(), CaptureError>;

    /// Sealed segments so far, in index order.
    fn segments(&self) -> Vec<Segment>;
}
