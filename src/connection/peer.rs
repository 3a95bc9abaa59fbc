//! Per-peer connection bookkeeping
//!
//! Owns the transport and the remote media binding for one remote
//! participant, applies transport state changes through the transition
//! table, and guarantees the exactly-once obligations: one peer-joined,
//! at most one peer-left (never before joined), and one media release
//! even when Closing and Failing race.

use super::{ConnectionError, ConnectionState, PeerTransport, StreamKind};
use crate::config::MediaConfig;
use crate::media::MediaBinding;
use crate::registry::SessionRegistry;
use crate::signalling::Participant;
use log::debug;
use std::sync::Arc;

/// Side effects owed after a state transition. The coordination loop
/// executes them; the connection only records what is due.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransitionActions {
    /// Emit on_peer_joined for this peer
    pub notify_joined: bool,
    /// Remove the remote binding from the registry and destroy it
    pub release_media: bool,
    /// Emit on_peer_left for this peer
    pub notify_left: bool,
    /// Terminal failure reached; automatic mode may reconnect
    pub reconnect_eligible: bool,
}

/// One negotiated media session with a remote participant.
pub struct PeerConnection {
    participant: Participant,
    transport: Box<dyn PeerTransport>,
    remote_media: Arc<MediaBinding>,
    state: ConnectionState,
    joined_notified: bool,
    left_notified: bool,
    media_released: bool,
}

impl PeerConnection {
    /// Build the connection and attach its audio/video streams.
    ///
    /// A stream side is attached only when its capability flag is set
    /// and the corresponding binding exists. The remote binding must
    /// already be registered in the session registry.
    pub fn connect(
        participant: Participant,
        transport: Box<dyn PeerTransport>,
        local_media: Option<Arc<MediaBinding>>,
        remote_media: Arc<MediaBinding>,
        media: &MediaConfig,
    ) -> Self {
        let local_handle = local_media.as_ref().map(|b| b.handle());
        let remote_handle = remote_media.handle();

        transport.attach_stream(
            StreamKind::Audio,
            local_handle.filter(|_| media.audio_send),
            media.audio_receive.then_some(remote_handle),
        );
        transport.attach_stream(
            StreamKind::Video,
            local_handle.filter(|_| media.video_send),
            media.video_receive.then_some(remote_handle),
        );

        Self {
            participant,
            transport,
            remote_media,
            state: ConnectionState::New,
            joined_notified: false,
            left_notified: false,
            media_released: false,
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remote_handle(&self) -> crate::media::MediaHandle {
        self.remote_media.handle()
    }

    /// Hand a manually-exchanged session record to the transport.
    pub fn apply_session_record(&self, record: &serde_json::Value) -> Result<(), ConnectionError> {
        self.transport.apply_session_record(record)
    }

    /// Apply one transport-reported transition and report the side
    /// effects it owes.
    pub fn apply_transition(
        &mut self,
        next: ConnectionState,
    ) -> Result<TransitionActions, ConnectionError> {
        if !self.state.can_transition(next) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(
            "connection {}: {} -> {}",
            self.participant.client_id, self.state, next
        );
        self.state = next;

        let mut actions = TransitionActions::default();
        match next {
            ConnectionState::Connected => {
                if !self.joined_notified {
                    self.joined_notified = true;
                    actions.notify_joined = true;
                }
            }
            ConnectionState::Closing | ConnectionState::Failing => {
                actions.release_media = true;
            }
            ConnectionState::Closed => {
                actions.notify_left = self.take_left_notification();
            }
            ConnectionState::Failed => {
                actions.notify_left = self.take_left_notification();
                actions.reconnect_eligible = true;
            }
            ConnectionState::New | ConnectionState::Connecting => {}
        }
        Ok(actions)
    }

    /// peer-left is owed only after peer-joined fired, at most once.
    fn take_left_notification(&mut self) -> bool {
        if self.joined_notified && !self.left_notified {
            self.left_notified = true;
            true
        } else {
            false
        }
    }

    /// Remove the remote binding from the registry and destroy it.
    ///
    /// Exactly-once even when Closing and Failing both request it:
    /// registry membership is the dedup key, checked before removal.
    pub fn release_media(&mut self, registry: &SessionRegistry) {
        if self.media_released {
            return;
        }
        let handle = self.remote_media.handle();
        if registry.contains(handle) {
            registry.unregister(handle);
            self.remote_media.destroy();
        }
        self.media_released = true;
    }

    /// Cancel pending negotiation and release everything this
    /// connection owns. Idempotent; safe in any state.
    pub fn destroy(&mut self, registry: &SessionRegistry) {
        self.transport.close();
        self.release_media(registry);
    }
}
