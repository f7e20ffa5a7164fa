//! # screen-capture-windows
//!
//! Windows backend for screen-capture-core.
//!
//! Provides:
//! - `Win32Targets` — display and window enumeration, desktop access check
//! - `Win32SourceFactory` — acquires the sources below for a session
//! - `GdiFrameCapture` — display/window frames via GDI `BitBlt`
//! - `WasapiLoopbackCapture` — system audio via WASAPI loopback on the render endpoint
//!
//! ## Artifact payloads
//! Nothing here encodes. Despite their `.mp4`/`.ogg` names, the artifacts
//! this backend produces are raw:
//! - video: back-to-back top-down 32bpp BGRA frames, each `width * height * 4`
//!   bytes at the target's size when the frame was grabbed
//! - system audio: interleaved little-endian `f32` PCM in the render
//!   endpoint's mix format (rate and channel count are logged at start)
//!
//! Transcode them before handing them to a player.
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use screen_capture_core::{InMemoryClaimRegistry, RecordingConfig, RecordingSession};
//! use screen_capture_windows::{Win32SourceFactory, Win32Targets};
//!
//! let session = RecordingSession::new(Win32Targets::new(), Win32SourceFactory, InMemoryClaimRegistry::shared());
//! session.start(RecordingConfig::for_display("C:/recordings/demo", display_id).with_system_audio(true))?;
//! session.stop()?;
//! ```

#[cfg(target_os = "windows")]
pub mod gdi_capture;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod targets;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;

#[cfg(target_os = "windows")]
pub use gdi_capture::GdiFrameCapture;
#[cfg(target_os = "windows")]
pub use targets::Win32Targets;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackCapture;

#[cfg(target_os = "windows")]
mod factory {
    use screen_capture_core::models::error::CaptureError;
    use screen_capture_core::models::stream_kind::StreamKind;
    use screen_capture_core::models::target::CaptureTarget;
    use screen_capture_core::traits::capture_source::{CaptureSource, SourceFactory};

    use crate::gdi_capture::GdiFrameCapture;
    use crate::permissions;
    use crate::wasapi_loopback::WasapiLoopbackCapture;

    /// Hands out GDI video and WASAPI loopback sources.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Win32SourceFactory;

    impl SourceFactory for Win32SourceFactory {
        fn acquire(
            &self,
            kind: StreamKind,
            target: &CaptureTarget,
            frame_rate: u32,
        ) -> Result<Box<dyn CaptureSource>, CaptureError> {
            match kind {
                StreamKind::DisplayVideo | StreamKind::WindowVideo => {
                    if StreamKind::video_for(target.kind) != kind {
                        return Err(CaptureError::CaptureStartFailed(format!(
                            "{} stream cannot capture {}",
                            kind,
                            target.target_ref()
                        )));
                    }
                    Ok(Box::new(GdiFrameCapture::new(target, frame_rate)))
                }
                StreamKind::SystemAudio => {
                    if !permissions::check_system_audio_permission() {
                        return Err(CaptureError::PermissionDenied);
                    }
                    Ok(Box::new(WasapiLoopbackCapture::default_device()))
                }
            }
        }
    }
}

#[cfg(target_os = "windows")]
pub use factory::Win32SourceFactory;
