//! Session registry
//!
//! Process-wide routing table from media handles to their bindings.
//! The single local binding sits in its own slot so UI-routed commands
//! can tell it apart from remote entries; remote bindings are inserted
//! on connection creation and removed on teardown.

use crate::media::{MediaBinding, MediaHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle-keyed lookup table for media bindings.
#[derive(Default)]
pub struct SessionRegistry {
    remotes: RwLock<HashMap<MediaHandle, Arc<MediaBinding>>>,
    local: RwLock<Option<Arc<MediaBinding>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the local binding. At most one exists per session.
    pub fn set_local(&self, binding: Arc<MediaBinding>) {
        *self.local.write() = Some(binding);
    }

    /// Remove and return the local binding.
    pub fn clear_local(&self) -> Option<Arc<MediaBinding>> {
        self.local.write().take()
    }

    pub fn local(&self) -> Option<Arc<MediaBinding>> {
        self.local.read().clone()
    }

    /// True if `handle` refers to the local binding.
    pub fn is_local(&self, handle: MediaHandle) -> bool {
        self.local
            .read()
            .as_ref()
            .is_some_and(|b| b.handle() == handle)
    }

    /// Insert a remote binding under its handle.
    pub fn register(&self, binding: Arc<MediaBinding>) {
        self.remotes.write().insert(binding.handle(), binding);
    }

    /// True if `handle` has a remote entry.
    pub fn contains(&self, handle: MediaHandle) -> bool {
        self.remotes.read().contains_key(&handle)
    }

    /// Remove a remote entry. Unknown handles are a no-op.
    pub fn unregister(&self, handle: MediaHandle) -> Option<Arc<MediaBinding>> {
        self.remotes.write().remove(&handle)
    }

    /// Resolve a handle to its binding: the local slot first, then the
    /// remote table. Unknown handles return None, never an error.
    pub fn lookup(&self, handle: MediaHandle) -> Option<Arc<MediaBinding>> {
        if let Some(local) = self.local.read().as_ref() {
            if local.handle() == handle {
                return Some(local.clone());
            }
        }
        self.remotes.read().get(&handle).cloned()
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.read().len()
    }

    pub fn remote_handles(&self) -> Vec<MediaHandle> {
        self.remotes.read().keys().copied().collect()
    }

    // UI-routed mute/record operations. Unknown handles are no-ops;
    // getters report false for them.

    pub fn set_audio_muted(&self, handle: MediaHandle, muted: bool) {
        if let Some(binding) = self.lookup(handle) {
            binding.set_audio_muted(muted);
        }
    }

    pub fn audio_muted(&self, handle: MediaHandle) -> bool {
        self.lookup(handle).is_some_and(|b| b.audio_muted())
    }

    pub fn set_video_muted(&self, handle: MediaHandle, muted: bool) {
        if let Some(binding) = self.lookup(handle) {
            binding.set_video_muted(muted);
        }
    }

    pub fn video_muted(&self, handle: MediaHandle) -> bool {
        self.lookup(handle).is_some_and(|b| b.video_muted())
    }

    pub fn set_recording_audio(&self, handle: MediaHandle, record: bool) {
        if let Some(binding) = self.lookup(handle) {
            if binding.is_recording_audio() != record {
                binding.toggle_audio_recording();
            }
        }
    }

    pub fn is_recording_audio(&self, handle: MediaHandle) -> bool {
        self.lookup(handle).is_some_and(|b| b.is_recording_audio())
    }

    pub fn set_recording_video(&self, handle: MediaHandle, record: bool) {
        if let Some(binding) = self.lookup(handle) {
            if binding.is_recording_video() != record {
                binding.toggle_video_recording();
            }
        }
    }

    pub fn is_recording_video(&self, handle: MediaHandle) -> bool {
        self.lookup(handle).is_some_and(|b| b.is_recording_video())
    }
}
