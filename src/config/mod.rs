//! Configuration management for peerchat-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Signalling mode selection.
///
/// Automatic and Manual signalling do not interoperate: a session
/// configured in one mode ignores discovery input shaped for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignallingMode {
    /// Peer discovery and offer/answer negotiation driven entirely by
    /// the signalling channel.
    #[default]
    Automatic,
    /// Operator-supplied out-of-band exchange of session records.
    Manual,
}

impl SignallingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignallingMode::Automatic => "automatic",
            SignallingMode::Manual => "manual",
        }
    }
}

/// A single STUN/TURN relay endpoint. Tried in list order by the
/// transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URL, e.g. "stun:stun.example.com:3478" or
    /// "turn:turn.example.com:443"
    pub url: String,

    /// TURN username (STUN entries leave this unset)
    #[serde(default)]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    /// A STUN entry without credentials.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// A TURN entry with credentials.
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration
    pub session: SessionConfig,

    /// Media capability configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// ICE relay configuration
    #[serde(default)]
    pub ice: IceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier registered with the signalling channel
    pub session_id: String,

    /// Display name announced to remote participants
    pub display_name: String,

    /// Signalling server URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Automatic or manual signalling (fixed for the session lifetime)
    #[serde(default)]
    pub signalling_mode: SignallingMode,

    /// Reconnect budget per remote peer after a Failed connection.
    /// Only consumed in automatic mode; the counter resets when a
    /// connection to that peer reaches Connected.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Send local audio to remote peers
    #[serde(default = "default_true")]
    pub audio_send: bool,

    /// Receive remote audio
    #[serde(default = "default_true")]
    pub audio_receive: bool,

    /// Send local video to remote peers
    #[serde(default = "default_true")]
    pub video_send: bool,

    /// Receive remote video
    #[serde(default = "default_true")]
    pub video_receive: bool,

    /// Capture the screen instead of the camera for the local video source
    #[serde(default)]
    pub screen_share: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// Relay endpoints, in preference order
    pub servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (error, warn, info, debug, trace)
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_server_url() -> String {
    "wss://signal.peerchat.local/v1".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            media: MediaConfig::default(),
            ice: IceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            display_name: "anonymous".to_string(),
            server_url: default_server_url(),
            signalling_mode: SignallingMode::Automatic,
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio_send: true,
            audio_receive: true,
            video_send: true,
            video_receive: true,
            screen_share: false,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                // "turn:" without a transport suffix lets the relay pick
                // TCP or UDP (RFC 7065 §3.1)
                IceServer::turn("turn:turn.peerchat.local:443", "peerchat", "peerchat"),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults if
    /// the file does not exist.
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.session.session_id.is_empty() {
            return Err("Session id must not be empty".into());
        }

        if self.session.display_name.is_empty() {
            return Err("Display name must not be empty".into());
        }

        if self.ice.servers.is_empty() {
            return Err("At least one ICE server is required".into());
        }

        Ok(())
    }
}
