use std::collections::HashMap;
use std::path::{self, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::target::TargetRef;
use crate::traits::claim_registry::ClaimRegistry;

/// Process-local claim registry: maps from target and from output root to
/// holder session id, each behind its own lock.
///
/// Share one instance (via `Arc`) between every session that must not
/// capture the same target, or write into the same directory, concurrently.
#[derive(Debug, Default)]
pub struct InMemoryClaimRegistry {
    claims: Mutex<HashMap<TargetRef, String>>,
    outputs: Mutex<HashMap<PathBuf, String>>,
}

impl InMemoryClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of targets and output roots currently claimed.
    pub fn len(&self) -> usize {
        self.claims.lock().len() + self.outputs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `rec` and `./rec` name the same root.
fn output_key(root: &Path) -> PathBuf {
    path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

impl ClaimRegistry for InMemoryClaimRegistry {
    fn claim(&self, target: TargetRef, holder: &str) -> Result<(), CaptureError> {
        let mut claims = self.claims.lock();
        match claims.get(&target) {
            Some(existing) if existing != holder => Err(CaptureError::TargetClaimed {
                target,
                holder: existing.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                claims.insert(target, holder.to_string());
                Ok(())
            }
        }
    }

    fn release(&self, target: TargetRef, holder: &str) {
        let mut claims = self.claims.lock();
        if claims.get(&target).is_some_and(|existing| existing == holder) {
            claims.remove(&target);
        }
    }

    fn holder(&self, target: TargetRef) -> Option<String> {
        self.claims.lock().get(&target).cloned()
    }

    fn claim_output(&self, root: &Path, holder: &str) -> Result<(), CaptureError> {
        let key = output_key(root);
        let mut outputs = self.outputs.lock();
        match outputs.get(&key) {
            Some(existing) if existing != holder => Err(CaptureError::OutputClaimed {
                path: key,
                holder: existing.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                outputs.insert(key, holder.to_string());
                Ok(())
            }
        }
    }

    fn release_output(&self, root: &Path, holder: &str) {
        let key = output_key(root);
        let mut outputs = self.outputs.lock();
        if outputs.get(&key).is_some_and(|existing| existing == holder) {
            outputs.remove(&key);
        }
    }
}
