//! Media endpoint bindings
//!
//! Wraps the media-engine collaborator behind capability traits and
//! tracks per-endpoint lifecycle, mute and recording state. Capture,
//! encode and render all live on the engine side of the seam.

pub mod binding;
pub mod null;

pub use binding::MediaBinding;
pub use null::NullMediaEngine;

use crate::signalling::Participant;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Media-related errors
#[derive(Debug)]
pub enum MediaError {
    /// Local/remote media construction failed; no connection is created
    Init(String),
    /// Invalid lifecycle transition (e.g. stopping an already-stopped source)
    InvalidState(String),
    /// Operation on a destroyed binding
    Destroyed,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Init(msg) => write!(f, "Media init failed: {}", msg),
            MediaError::InvalidState(msg) => write!(f, "Invalid media state: {}", msg),
            MediaError::Destroyed => write!(f, "Media binding already destroyed"),
        }
    }
}

impl Error for MediaError {}

/// Opaque UI-facing token identifying one media binding.
///
/// Minted from a process-wide arena counter; stable for the binding's
/// lifetime and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl MediaHandle {
    pub(crate) fn next() -> Self {
        MediaHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

/// Which end of the session a binding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Local,
    Remote,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::Local => "local",
            BindingKind::Remote => "remote",
        }
    }
}

/// Local media source selection, chosen at session start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaProfile {
    /// Capture audio
    pub audio: bool,
    /// Capture video
    pub video: bool,
    /// Capture the screen instead of the camera
    pub screen_share: bool,
}

/// One media endpoint owned by the media engine.
///
/// Implementations must not block: heavy device work belongs on the
/// engine's own threads.
pub trait MediaEndpoint: Send + Sync {
    /// Begin capture/render for this endpoint.
    fn start(&self) -> Result<(), MediaError>;

    /// Stop capture/render. Called at most once after a successful start.
    fn stop(&self) -> Result<(), MediaError>;

    /// Release engine resources. Called exactly once.
    fn destroy(&self);
}

/// Media engine collaborator: constructs local and remote endpoints.
pub trait MediaEngine: Send + Sync {
    /// Create the local capture endpoint for the given profile.
    fn create_local(&self, profile: &MediaProfile) -> Result<Box<dyn MediaEndpoint>, MediaError>;

    /// Create a render endpoint for one remote participant.
    fn create_remote(&self, remote: &Participant) -> Result<Box<dyn MediaEndpoint>, MediaError>;
}
