use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a capture target is a whole display or a single window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Display,
    Window,
}

/// Compact reference to a capture target: kind plus numeric id.
///
/// Display ids and window ids live in separate namespaces, so the kind is
/// part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: u32,
}

impl TargetRef {
    pub fn display(id: u32) -> Self {
        Self {
            kind: TargetKind::Display,
            id,
        }
    }

    pub fn window(id: u32) -> Self {
        Self {
            kind: TargetKind::Window,
            id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Display => write!(f, "display {}", self.id),
            TargetKind::Window => write!(f, "window {}", self.id),
        }
    }
}

/// A display or window eligible for capture.
///
/// Immutable snapshot from a `CapabilityProvider` query. `owner_name` is only
/// set for windows and `refresh_rate` only for displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub kind: TargetKind,
    pub id: u32,
    pub name: String,
    pub owner_name: Option<String>,
    pub refresh_rate: Option<u32>,
}

impl CaptureTarget {
    pub fn display(id: u32, name: impl Into<String>, refresh_rate: u32) -> Self {
        Self {
            kind: TargetKind::Display,
            id,
            name: name.into(),
            owner_name: None,
            refresh_rate: Some(refresh_rate),
        }
    }

    pub fn window(id: u32, title: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Window,
            id,
            name: title.into(),
            owner_name: Some(owner_name.into()),
            refresh_rate: None,
        }
    }

    pub fn target_ref(&self) -> TargetRef {
        TargetRef {
            kind: self.kind,
            id: self.id,
        }
    }
}
