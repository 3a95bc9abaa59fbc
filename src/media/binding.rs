//! Media binding lifecycle and mute/record state
//!
//! A `MediaBinding` exclusively owns one engine endpoint and tracks:
//! - lifecycle (Created -> Started -> Stopped, terminal Destroyed)
//! - capability flags fixed at construction
//! - mute and recording toggles, safe to flip concurrently with
//!   connection state transitions

use super::{BindingKind, MediaEndpoint, MediaError, MediaHandle};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle phase of a binding's endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
    Destroyed,
}

/// One local or remote media endpoint.
pub struct MediaBinding {
    handle: MediaHandle,
    kind: BindingKind,
    audio_enabled: bool,
    video_enabled: bool,
    audio_muted: AtomicBool,
    video_muted: AtomicBool,
    recording_audio: AtomicBool,
    recording_video: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    endpoint: Box<dyn MediaEndpoint>,
}

impl MediaBinding {
    /// Wrap an engine endpoint in a new binding.
    ///
    /// `audio_enabled`/`video_enabled` are the capability flags for
    /// this side of the session (send flags for the local binding,
    /// receive flags for a remote one).
    pub fn new(
        kind: BindingKind,
        audio_enabled: bool,
        video_enabled: bool,
        endpoint: Box<dyn MediaEndpoint>,
    ) -> Self {
        Self {
            handle: MediaHandle::next(),
            kind,
            audio_enabled,
            video_enabled,
            audio_muted: AtomicBool::new(false),
            video_muted: AtomicBool::new(false),
            recording_audio: AtomicBool::new(false),
            recording_video: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Created),
            endpoint,
        }
    }

    /// Opaque lookup key for registry/UI routing.
    pub fn handle(&self) -> MediaHandle {
        self.handle
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Start the endpoint. Valid from Created or Stopped.
    pub async fn start(&self) -> Result<(), MediaError> {
        {
            let state = self.lifecycle.lock();
            match *state {
                Lifecycle::Created | Lifecycle::Stopped => {}
                Lifecycle::Started => {
                    return Err(MediaError::InvalidState(format!(
                        "{} {} is already started",
                        self.kind.as_str(),
                        self.handle
                    )));
                }
                Lifecycle::Destroyed => return Err(MediaError::Destroyed),
            }
        }

        self.endpoint.start()?;
        *self.lifecycle.lock() = Lifecycle::Started;
        debug!("{} media {} started", self.kind.as_str(), self.handle);
        Ok(())
    }

    /// Stop the endpoint. Only valid from Started.
    pub async fn stop(&self) -> Result<(), MediaError> {
        {
            let state = self.lifecycle.lock();
            match *state {
                Lifecycle::Started => {}
                Lifecycle::Created | Lifecycle::Stopped => {
                    return Err(MediaError::InvalidState(format!(
                        "{} {} is not running",
                        self.kind.as_str(),
                        self.handle
                    )));
                }
                Lifecycle::Destroyed => return Err(MediaError::Destroyed),
            }
        }

        self.endpoint.stop()?;
        *self.lifecycle.lock() = Lifecycle::Stopped;
        debug!("{} media {} stopped", self.kind.as_str(), self.handle);
        Ok(())
    }

    /// Release the engine endpoint. Idempotent; the endpoint is
    /// destroyed exactly once.
    pub fn destroy(&self) {
        let mut state = self.lifecycle.lock();
        if *state == Lifecycle::Destroyed {
            return;
        }
        *state = Lifecycle::Destroyed;
        drop(state);

        self.endpoint.destroy();
        debug!("{} media {} destroyed", self.kind.as_str(), self.handle);
    }

    pub fn is_destroyed(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Destroyed
    }

    pub fn set_audio_muted(&self, muted: bool) {
        self.audio_muted.store(muted, Ordering::Relaxed);
    }

    pub fn audio_muted(&self) -> bool {
        self.audio_muted.load(Ordering::Relaxed)
    }

    pub fn set_video_muted(&self, muted: bool) {
        self.video_muted.store(muted, Ordering::Relaxed);
    }

    pub fn video_muted(&self) -> bool {
        self.video_muted.load(Ordering::Relaxed)
    }

    pub fn toggle_audio_recording(&self) {
        self.recording_audio.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn is_recording_audio(&self) -> bool {
        self.recording_audio.load(Ordering::Relaxed)
    }

    pub fn toggle_video_recording(&self) {
        self.recording_video.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn is_recording_video(&self) -> bool {
        self.recording_video.load(Ordering::Relaxed)
    }
}

impl Drop for MediaBinding {
    fn drop(&mut self) {
        // Ownership invariant: the endpoint must not outlive the binding.
        self.destroy();
    }
}

impl std::fmt::Debug for MediaBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBinding")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("audio_enabled", &self.audio_enabled)
            .field("video_enabled", &self.video_enabled)
            .finish()
    }
}
