pub mod config;
pub mod diagnostics;
pub mod error;
pub mod recording_result;
pub mod segment;
pub mod state;
pub mod stream_kind;
pub mod target;
