use crate::models::target::{CaptureTarget, TargetKind, TargetRef};

/// Read-only view of what can be captured on this machine.
///
/// Implemented by platform backends (`Win32Targets` on Windows). Listings are
/// re-enumerated on every call; ordering is only stable within one call.
/// "No targets" is an empty list, never an error. Missing permission is only
/// reported by `has_permission`.
pub trait CapabilityProvider: Send + Sync {
    /// Whether the OS currently authorizes screen capture. Must not block.
    fn has_permission(&self) -> bool;

    /// Displays currently attached.
    fn list_displays(&self) -> Vec<CaptureTarget>;

    /// Capturable top-level windows. May be large; callers filter by
    /// name or owner.
    fn list_windows(&self) -> Vec<CaptureTarget>;
}

/// Resolve a target reference against a fresh listing.
pub fn find_target<P: CapabilityProvider + ?Sized>(provider: &P, target: TargetRef) -> Option<CaptureTarget> {
    let candidates = match target.kind {
        TargetKind::Display => provider.list_displays(),
        TargetKind::Window => provider.list_windows(),
    };
    candidates.into_iter().find(|t| t.id == target.id)
}
