//! Signalling channel collaborator surface
//!
//! The channel carries presence, departure and text records between
//! participants of a named session. Transport and wire format are the
//! collaborator's business; delivery is at-least-once, so the session
//! layer deduplicates by client id.

pub mod local;

pub use local::LocalSignallingHub;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio::sync::mpsc;

/// Opaque signalling-layer client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// Identity of one participant as known to signalling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Display name
    pub name: String,
    /// Signalling-layer identifier, unique within a session
    pub client_id: ClientId,
}

impl Participant {
    pub fn new(name: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            name: name.into(),
            client_id,
        }
    }
}

/// Events delivered by the signalling channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignallingEvent {
    /// A remote participant's presence record appeared
    Presence(Participant),
    /// A remote participant departed or timed out
    Departure(ClientId),
    /// A text record from a remote participant
    Text { from: String, body: String },
}

/// Out-of-band session record used by manual signalling. The payload
/// is opaque to the session layer and handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub participant: Participant,
    pub payload: serde_json::Value,
}

/// Signalling-related errors
#[derive(Debug)]
pub enum SignallingError {
    /// The channel could not be reached
    Unreachable(String),
    /// The session identifier was rejected by the channel
    Rejected(String),
    /// Operation requires a joined session
    NotJoined,
    /// A record could not be delivered
    Delivery(String),
}

impl fmt::Display for SignallingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignallingError::Unreachable(msg) => write!(f, "Signalling unreachable: {}", msg),
            SignallingError::Rejected(msg) => write!(f, "Session rejected: {}", msg),
            SignallingError::NotJoined => write!(f, "Not joined to a session"),
            SignallingError::Delivery(msg) => write!(f, "Delivery failed: {}", msg),
        }
    }
}

impl Error for SignallingError {}

/// Signalling channel collaborator.
///
/// Object-safe: async operations return boxed futures so the session
/// can hold the channel behind `Arc<dyn SignallingChannel>`.
pub trait SignallingChannel: Send + Sync {
    /// This endpoint's signalling-layer identity.
    fn local_id(&self) -> ClientId;

    /// Register presence under `session_id` and start receiving events.
    ///
    /// On success the returned receiver yields presence/departure/text
    /// events in the order the channel produced them.
    fn join(
        &self,
        session_id: &str,
        local: Participant,
    ) -> BoxFuture<'static, Result<mpsc::UnboundedReceiver<SignallingEvent>, SignallingError>>;

    /// Deregister presence. Idempotent.
    fn leave(&self) -> BoxFuture<'static, Result<(), SignallingError>>;

    /// Publish a text record to all current participants. Delivery
    /// failure is reported, never swallowed.
    fn send_text(&self, from: &Participant, body: &str) -> Result<(), SignallingError>;
}
