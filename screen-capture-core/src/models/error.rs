use std::path::PathBuf;

use thiserror::Error;

use super::state::SessionState;
use super::stream_kind::StreamKind;
use super::target::TargetRef;

/// Errors that can occur during screen capture operations.
///
/// Nothing here is fatal to the process: every variant leaves the session
/// either untouched or in a terminal state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("`{operation}` is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("capture target not found: {0}")]
    TargetNotFound(TargetRef),

    #[error("capture target {target} is already claimed by session {holder}")]
    TargetClaimed { target: TargetRef, holder: String },

    #[error("output path {} is already in use by session {holder}", .path.display())]
    OutputClaimed { path: PathBuf, holder: String },

    #[error("capture start failed: {0}")]
    CaptureStartFailed(String),

    #[error("another lifecycle operation is in progress")]
    OperationInProgress,

    #[error("recording stopped, but {forced:?} had to be force-terminated")]
    PartialStop {
        path: PathBuf,
        forced: Vec<StreamKind>,
    },

    #[error("recording cancelled, but {forced:?} had to be force-terminated")]
    PartialCancel { forced: Vec<StreamKind> },

    #[error("write to {kind} stream failed: {message}")]
    StreamWriteFailed { kind: StreamKind, message: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub(crate) fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }
}
