use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "peerchat-core")]
#[command(author = "Peerchat Team")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer video/text chat core", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/peerchat-core.toml")]
    pub config: PathBuf,

    /// Session to join
    #[arg(short, long)]
    pub session_id: Option<String>,

    /// Display name announced to peers
    #[arg(short, long)]
    pub name: Option<String>,

    /// Signalling server URL
    #[arg(long)]
    pub server_url: Option<String>,

    /// Use manual signalling (out-of-band session record exchange)
    #[arg(long, action)]
    pub manual: bool,

    /// Disable sending local audio
    #[arg(long, action)]
    pub no_audio: bool,

    /// Disable sending local video
    #[arg(long, action)]
    pub no_video: bool,

    /// Share the screen instead of the camera
    #[arg(long, action)]
    pub screen_share: bool,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    /// Load the TOML config and apply command line overrides.
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut cfg = config::Config::load(&self.config)?;

        if let Some(ref sid) = self.session_id {
            cfg.session.session_id = sid.clone();
        }
        if let Some(ref name) = self.name {
            cfg.session.display_name = name.clone();
        }
        if let Some(ref url) = self.server_url {
            cfg.session.server_url = url.clone();
        }
        if self.manual {
            cfg.session.signalling_mode = config::SignallingMode::Manual;
        }
        if self.no_audio {
            cfg.media.audio_send = false;
        }
        if self.no_video {
            cfg.media.video_send = false;
        }
        if self.screen_share {
            cfg.media.screen_share = true;
        }

        Ok(cfg)
    }
}
