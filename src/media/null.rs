//! Headless media engine
//!
//! Used for text-only sessions and in tests: endpoints start, stop and
//! destroy without touching any capture or render device.

use super::{MediaEndpoint, MediaEngine, MediaError, MediaProfile};
use crate::signalling::Participant;
use log::debug;

/// Endpoint that does nothing.
pub struct NullEndpoint;

impl MediaEndpoint for NullEndpoint {
    fn start(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn destroy(&self) {}
}

/// Media engine that hands out `NullEndpoint`s.
#[derive(Default)]
pub struct NullMediaEngine;

impl NullMediaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for NullMediaEngine {
    fn create_local(&self, profile: &MediaProfile) -> Result<Box<dyn MediaEndpoint>, MediaError> {
        debug!(
            "null engine: local endpoint (audio={}, video={}, screen_share={})",
            profile.audio, profile.video, profile.screen_share
        );
        Ok(Box::new(NullEndpoint))
    }

    fn create_remote(&self, remote: &Participant) -> Result<Box<dyn MediaEndpoint>, MediaError> {
        debug!("null engine: remote endpoint for {}", remote.name);
        Ok(Box::new(NullEndpoint))
    }
}
