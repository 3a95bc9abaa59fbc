//! Per-peer connection state machine
//!
//! Each remote participant gets one `PeerConnection` driving a
//! transport collaborator from creation through negotiation to
//! teardown. The transport reports state changes over a channel in
//! the order it produced them; the session's coordination loop applies
//! them through an explicit transition table.

pub mod loopback;
pub mod peer;

pub use loopback::LoopbackTransportFactory;
pub use peer::PeerConnection;

use crate::config::IceServer;
use crate::media::MediaHandle;
use crate::signalling::Participant;
use std::error::Error;
use std::fmt;
use tokio::sync::mpsc;

/// Connection lifecycle states.
///
/// `New -> Connecting -> Connected -> {Closing -> Closed | Failing -> Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, negotiation not yet started
    New,
    /// Negotiation in progress
    Connecting,
    /// Media flowing
    Connected,
    /// Orderly teardown in progress
    Closing,
    /// Orderly teardown complete (terminal)
    Closed,
    /// Transport failure in progress
    Failing,
    /// Transport failure complete (terminal)
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Transition legality table. Anything not listed here is a
    /// protocol violation reported by `PeerConnection::apply_transition`.
    pub fn can_transition(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (New, Connecting)
                | (New, Closing)
                | (New, Failing)
                | (Connecting, Connected)
                | (Connecting, Closing)
                | (Connecting, Failing)
                | (Connected, Closing)
                | (Connected, Failing)
                | (Closing, Closed)
                | (Failing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failing => "failing",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media stream kind carried by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
}

/// Connection-related errors
#[derive(Debug)]
pub enum ConnectionError {
    /// The transport reported a transition the table forbids
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A manual-mode session record could not be applied
    InvalidRecord(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {} -> {}", from, to)
            }
            ConnectionError::InvalidRecord(msg) => write!(f, "Invalid session record: {}", msg),
        }
    }
}

impl Error for ConnectionError {}

/// Transport collaborator for one peer. Negotiation internals
/// (ICE/STUN/TURN, offer/answer) stay on the transport side.
pub trait PeerTransport: Send + Sync {
    /// Attach one media stream. A side is passed only when that
    /// direction is enabled and a binding exists for it.
    fn attach_stream(
        &self,
        kind: StreamKind,
        send: Option<MediaHandle>,
        receive: Option<MediaHandle>,
    );

    /// Apply a manually-exchanged session record (manual signalling
    /// mode only).
    fn apply_session_record(&self, record: &serde_json::Value) -> Result<(), ConnectionError>;

    /// Cancel pending negotiation and tear the transport down.
    /// Idempotent; state events stop after the terminal one.
    fn close(&self);
}

/// Creates one transport per remote peer.
pub trait TransportFactory: Send + Sync {
    /// Build a transport for `remote`. The transport reports every
    /// state change through `state_tx`, in the order it produces them.
    /// `ice_servers` are tried in list order and are immutable for the
    /// transport's lifetime.
    fn create(
        &self,
        remote: &Participant,
        ice_servers: &[IceServer],
        state_tx: mpsc::UnboundedSender<ConnectionState>,
    ) -> Box<dyn PeerTransport>;
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(New.can_transition(Connecting));
        assert!(Connecting.can_transition(Connected));
        assert!(Connected.can_transition(Closing));
        assert!(Closing.can_transition(Closed));
    }

    #[test]
    fn test_failure_path_transitions() {
        assert!(Connecting.can_transition(Failing));
        assert!(Connected.can_transition(Failing));
        assert!(Failing.can_transition(Failed));
    }

    #[test]
    fn test_cancel_before_negotiation() {
        assert!(New.can_transition(Closing));
        assert!(New.can_transition(Failing));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in [New, Connecting, Connected, Closing, Closed, Failing, Failed] {
            assert!(!Closed.can_transition(next));
            assert!(!Failed.can_transition(next));
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(!New.can_transition(Connected));
        assert!(!Connecting.can_transition(Closed));
        assert!(!Connected.can_transition(Failed));
        assert!(!Closing.can_transition(Failed));
        assert!(!Failing.can_transition(Closed));
        assert!(!Connected.can_transition(Connected));
    }
}
