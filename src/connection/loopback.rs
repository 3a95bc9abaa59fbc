//! In-process loopback transport
//!
//! Walks New -> Connecting -> Connected as soon as it is created and
//! reports Closing -> Closed on close. No packets move anywhere; the
//! demo binary and hub tests use it in place of a real ICE transport.

use super::{ConnectionError, ConnectionState, PeerTransport, StreamKind, TransportFactory};
use crate::config::IceServer;
use crate::media::MediaHandle;
use crate::signalling::Participant;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub struct LoopbackTransport {
    state_tx: mpsc::UnboundedSender<ConnectionState>,
    closed: Mutex<bool>,
}

impl PeerTransport for LoopbackTransport {
    fn attach_stream(
        &self,
        kind: StreamKind,
        send: Option<MediaHandle>,
        receive: Option<MediaHandle>,
    ) {
        debug!(
            "loopback: attach {:?} stream (send={:?}, receive={:?})",
            kind, send, receive
        );
    }

    fn apply_session_record(&self, record: &serde_json::Value) -> Result<(), ConnectionError> {
        if !record.is_object() {
            return Err(ConnectionError::InvalidRecord(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.state_tx.send(ConnectionState::Closing);
        let _ = self.state_tx.send(ConnectionState::Closed);
    }
}

/// Factory for loopback transports.
#[derive(Default)]
pub struct LoopbackTransportFactory;

impl LoopbackTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for LoopbackTransportFactory {
    fn create(
        &self,
        remote: &Participant,
        ice_servers: &[IceServer],
        state_tx: mpsc::UnboundedSender<ConnectionState>,
    ) -> Box<dyn PeerTransport> {
        debug!(
            "loopback: transport for {} ({} ice servers ignored)",
            remote.name,
            ice_servers.len()
        );
        let _ = state_tx.send(ConnectionState::Connecting);
        let _ = state_tx.send(ConnectionState::Connected);
        Box::new(LoopbackTransport {
            state_tx,
            closed: Mutex::new(false),
        })
    }
}
