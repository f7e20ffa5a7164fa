//! Windows screen and system audio capture permission checks.
//!
//! Unpackaged desktop apps need no consent to read the screen through GDI.
//! What can fail is access to the interactive desktop itself: services,
//! locked workstations and secure desktops (UAC, Ctrl+Alt+Del) hand out no
//! usable screen DC. That is what "no permission" means here.

use windows::Win32::Graphics::Gdi::{GetDC, ReleaseDC};

/// Whether the calling process can currently read the interactive desktop.
///
/// Never blocks: one `GetDC`/`ReleaseDC` pair on the screen.
pub fn has_screen_capture_permission() -> bool {
    unsafe {
        let screen = GetDC(None);
        if screen.is_invalid() {
            log::debug!("No screen DC available, desktop is not accessible");
            return false;
        }
        ReleaseDC(None, screen);
        true
    }
}

/// System audio (loopback) capture does not require any permissions on Windows.
pub fn check_system_audio_permission() -> bool {
    // WASAPI loopback is unrestricted
    true
}
