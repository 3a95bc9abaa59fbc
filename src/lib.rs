//! peerchat-core - Peer-to-peer chat session orchestration
//!
//! Session-layer plumbing for peer-to-peer video/text chat: presence
//! driven peer discovery, a per-peer connection state machine, media
//! binding lifecycle with UI-routed mute/record, and a reconnect
//! policy, all behind collaborator traits for signalling, transport
//! and media engines.

pub mod args;
pub mod config;
pub mod connection;
pub mod media;
pub mod registry;
pub mod session;
pub mod signalling;

// Re-exports
pub use config::{Config, IceServer, SignallingMode};
pub use connection::{ConnectionState, PeerTransport, TransportFactory};
pub use media::{MediaBinding, MediaEngine, MediaHandle};
pub use registry::SessionRegistry;
pub use session::{Session, SessionError, SessionObserver};
pub use signalling::{Participant, SignallingChannel, SignallingEvent};
