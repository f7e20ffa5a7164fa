//! # screen-capture-core
//!
//! Platform-agnostic screen recording core library.
//!
//! Provides the recording session state machine, per-stream workers with
//! bounded shutdown, segmented on-disk storage and target claiming.
//! Platform backends (Windows GDI/WASAPI) implement `CapabilityProvider`
//! and `SourceFactory` and plug into the generic `RecordingSession`.
//!
//! ## Architecture
//!
//! ```text
//! screen-capture-core (this crate)
//! ├── traits/   ← CapabilityProvider, SourceFactory, CaptureSource, ClaimRegistry, SessionDelegate
//! ├── models/   ← CaptureError, SessionState, RecordingConfig, CaptureTarget, Segment, etc.
//! ├── stream/   ← CaptureStream (worker thread per source), ChunkSink
//! ├── session/  ← RecordingSession (generic controller), InMemoryClaimRegistry
//! └── storage/  ← SegmentWriter, layout, metadata sidecar, inspection
//! ```
//!
//! ## Output layout
//!
//! ```text
//! <output_path>/
//! ├── recording-meta.json
//! └── content/segments/
//!     ├── segment-0/{display.mp4 | window.mp4}[, system_audio.ogg]
//!     └── segment-1/...
//! ```
//!
//! Artifacts hold the source's chunks concatenated byte for byte. The session
//! never muxes or encodes, so the `.mp4`/`.ogg` names describe the intended
//! container, not the bytes: a backend that emits raw frames or PCM produces
//! raw artifacts under those names. Each backend documents its payload.

pub mod models;
pub mod session;
pub mod storage;
pub mod stream;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{RecordingConfig, SessionOptions};
pub use models::diagnostics::StreamDiagnostics;
pub use models::error::CaptureError;
pub use models::recording_result::{RecordingMeta, RecordingResult};
pub use models::segment::{Segment, SegmentArtifact};
pub use models::state::SessionState;
pub use models::stream_kind::StreamKind;
pub use models::target::{CaptureTarget, TargetKind, TargetRef};
pub use session::claims::InMemoryClaimRegistry;
pub use session::recording::RecordingSession;
pub use storage::inspect::{inspect_recording, integrity_issues, IntegrityIssue, SegmentListing};
pub use storage::metadata::read_metadata;
pub use stream::sink::{ChunkSink, MediaChunk};
pub use traits::capability_provider::{find_target, CapabilityProvider};
pub use traits::capture_session::CaptureSession;
pub use traits::capture_source::{CaptureSource, SourceFactory};
pub use traits::claim_registry::ClaimRegistry;
pub use traits::session_delegate::SessionDelegate;
