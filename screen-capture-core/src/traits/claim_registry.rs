use std::path::Path;

use crate::models::error::CaptureError;
use crate::models::target::TargetRef;

/// Exclusivity tracker: at most one active session per capture target, and
/// at most one per output root.
///
/// Injected into each session so tests can share or fake it. Implementations
/// hold their lock only for the duration of a single call.
pub trait ClaimRegistry: Send + Sync {
    /// Claim `target` for `holder`. Fails with `TargetClaimed` if another
    /// holder has it.
    fn claim(&self, target: TargetRef, holder: &str) -> Result<(), CaptureError>;

    /// Release `target` if `holder` owns it. Releasing an unowned target is a
    /// no-op.
    fn release(&self, target: TargetRef, holder: &str);

    /// Current holder of `target`, if any.
    fn holder(&self, target: TargetRef) -> Option<String>;

    /// Claim the output root `root` for `holder`. Fails with
    /// `OutputClaimed` if another holder writes there.
    fn claim_output(&self, root: &Path, holder: &str) -> Result<(), CaptureError>;

    /// Release `root` if `holder` owns it.
    fn release_output(&self, root: &Path, holder: &str);
}
