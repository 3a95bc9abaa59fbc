//! In-process signalling hub
//!
//! A channel implementation backed by process-local fan-out: presence
//! of existing members is replayed to newcomers, departures are
//! broadcast, and text records go to every member except the sender.
//! Used by the demo binary and by tests; real deployments substitute a
//! network-backed `SignallingChannel`.

use super::{
    ClientId, Participant, SignallingChannel, SignallingError, SignallingEvent,
};
use futures::future::BoxFuture;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Member {
    participant: Participant,
    tx: mpsc::UnboundedSender<SignallingEvent>,
}

#[derive(Default)]
struct HubInner {
    // session id -> members keyed by client id
    sessions: HashMap<String, HashMap<ClientId, Member>>,
}

/// Process-local signalling hub.
#[derive(Clone, Default)]
pub struct LocalSignallingHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalSignallingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a channel endpoint with a fresh client id.
    pub fn channel(&self) -> LocalSignallingChannel {
        LocalSignallingChannel {
            hub: self.inner.clone(),
            client_id: ClientId(Uuid::new_v4().to_string()),
            joined: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of members currently present in `session_id`.
    pub fn member_count(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .map_or(0, |m| m.len())
    }
}

struct JoinedState {
    session_id: String,
    participant: Participant,
}

/// One participant's endpoint on a `LocalSignallingHub`.
pub struct LocalSignallingChannel {
    hub: Arc<Mutex<HubInner>>,
    client_id: ClientId,
    joined: Arc<Mutex<Option<JoinedState>>>,
}

impl LocalSignallingChannel {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn do_leave(&self) {
        let joined = self.joined.lock().take();
        let Some(state) = joined else {
            return;
        };

        let mut hub = self.hub.lock();
        let Some(members) = hub.sessions.get_mut(&state.session_id) else {
            return;
        };
        members.remove(&self.client_id);

        for member in members.values() {
            let _ = member
                .tx
                .send(SignallingEvent::Departure(self.client_id.clone()));
        }
        if members.is_empty() {
            hub.sessions.remove(&state.session_id);
        }
        debug!(
            "hub: {} left session {}",
            state.participant.name, state.session_id
        );
    }
}

impl SignallingChannel for LocalSignallingChannel {
    fn local_id(&self) -> ClientId {
        self.client_id.clone()
    }

    fn join(
        &self,
        session_id: &str,
        local: Participant,
    ) -> BoxFuture<'static, Result<mpsc::UnboundedReceiver<SignallingEvent>, SignallingError>>
    {
        let hub = self.hub.clone();
        let joined = self.joined.clone();
        let client_id = self.client_id.clone();
        let session_id = session_id.to_string();

        Box::pin(async move {
            if session_id.is_empty() {
                return Err(SignallingError::Rejected("empty session id".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();

            {
                let mut inner = hub.lock();
                let members = inner.sessions.entry(session_id.clone()).or_default();

                // Replay existing members to the newcomer and announce
                // the newcomer to everyone already present.
                for member in members.values() {
                    let _ = tx.send(SignallingEvent::Presence(member.participant.clone()));
                    let _ = member.tx.send(SignallingEvent::Presence(local.clone()));
                }

                members.insert(
                    client_id.clone(),
                    Member {
                        participant: local.clone(),
                        tx,
                    },
                );
            }

            *joined.lock() = Some(JoinedState {
                session_id: session_id.clone(),
                participant: local.clone(),
            });

            debug!("hub: {} joined session {}", local.name, session_id);
            Ok(rx)
        })
    }

    fn leave(&self) -> BoxFuture<'static, Result<(), SignallingError>> {
        self.do_leave();
        Box::pin(async { Ok(()) })
    }

    fn send_text(&self, from: &Participant, body: &str) -> Result<(), SignallingError> {
        let joined = self.joined.lock();
        let state = joined.as_ref().ok_or(SignallingError::NotJoined)?;

        let hub = self.hub.lock();
        let members = hub
            .sessions
            .get(&state.session_id)
            .ok_or_else(|| SignallingError::Delivery("session is gone".to_string()))?;

        for (id, member) in members.iter() {
            if *id == self.client_id {
                continue;
            }
            member
                .tx
                .send(SignallingEvent::Text {
                    from: from.name.clone(),
                    body: body.to_string(),
                })
                .map_err(|_| {
                    SignallingError::Delivery(format!("member {} unreachable", member.participant.name))
                })?;
        }
        Ok(())
    }
}

impl Drop for LocalSignallingChannel {
    fn drop(&mut self) {
        self.do_leave();
    }
}
