//! CLI surface and environment variables, composed into one `Config`
//! validated once at startup.

use clap::Parser;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum AudioOutputMode {
    Local,
    Streaming,
}

impl AudioOutputMode {
    fn from_env(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "streaming" => Some(Self::Streaming),
            _ => None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "daw-server", version, about = "Realtime session runtime for a visual-opcode audio workstation")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    #[arg(long, value_enum)]
    pub audio_output_mode: Option<AudioOutputMode>,

    #[arg(long)]
    pub no_reload: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long)]
    pub debug: bool,
}

/// Exit codes named in the transport surface: 0 normal, 1 fatal startup
/// error, 2 configuration error.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Normal = 0,
    FatalStartup = 1,
    Configuration = 2,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub frame_ms: u32,
    pub queue_frames_max: usize,
    pub queue_frames_target: usize,
    pub flush_on_connect: bool,
    pub turn_external_ip: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            frame_ms: 10,
            queue_frames_max: 4,
            queue_frames_target: 2,
            flush_on_connect: true,
            turn_external_ip: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub audio_output_mode: AudioOutputMode,
    pub no_reload: bool,
    pub log_level: String,
    pub debug: bool,
    pub cors_origins: Vec<String>,
    pub bridge: BridgeConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid WEBRTC_AUDIO_FRAME_MS value: {0}")]
    InvalidFrameMs(String),
    #[error("invalid WEBRTC_AUDIO_QUEUE_FRAMES_MAX value: {0}")]
    InvalidQueueMax(String),
    #[error("invalid WEBRTC_AUDIO_QUEUE_FRAMES_TARGET value: {0}")]
    InvalidQueueTarget(String),
    #[error("WEBRTC_AUDIO_FRAME_MS must be 10 or 20, got {0}")]
    UnsupportedFrameMs(u32),
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let audio_output_mode = cli
            .audio_output_mode
            .or_else(|| std::env::var("AUDIO_OUTPUT_MODE").ok().and_then(|v| AudioOutputMode::from_env(&v)))
            .unwrap_or(AudioOutputMode::Local);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let mut bridge = BridgeConfig::default();
        if let Ok(raw) = std::env::var("WEBRTC_AUDIO_FRAME_MS") {
            let ms: u32 = raw.parse().map_err(|_| ConfigError::InvalidFrameMs(raw.clone()))?;
            if ms != 10 && ms != 20 {
                return Err(ConfigError::UnsupportedFrameMs(ms));
            }
            bridge.frame_ms = ms;
        }
        if let Ok(raw) = std::env::var("WEBRTC_AUDIO_QUEUE_FRAMES_MAX") {
            bridge.queue_frames_max = raw.parse().map_err(|_| ConfigError::InvalidQueueMax(raw.clone()))?;
        }
        if let Ok(raw) = std::env::var("WEBRTC_AUDIO_QUEUE_FRAMES_TARGET") {
            bridge.queue_frames_target = raw.parse().map_err(|_| ConfigError::InvalidQueueTarget(raw.clone()))?;
        }
        if let Ok(raw) = std::env::var("WEBRTC_AUDIO_FLUSH_ON_CONNECT") {
            bridge.flush_on_connect = raw != "0" && !raw.eq_ignore_ascii_case("false");
        }
        bridge.turn_external_ip = std::env::var("TURN_EXTERNAL_IP").ok();

        Ok(Self {
            host: cli.host,
            port: cli.port,
            audio_output_mode,
            no_reload: cli.no_reload,
            log_level: cli.log_level,
            debug: cli.debug,
            cors_origins,
            bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_output_mode_parses_case_insensitively() {
        assert_eq!(AudioOutputMode::from_env("Streaming"), Some(AudioOutputMode::Streaming));
        assert_eq!(AudioOutputMode::from_env("bogus"), None);
    }

    #[test]
    fn cli_defaults_to_local_mode() {
        let cli = Cli::parse_from(["daw-server"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.audio_output_mode, AudioOutputMode::Local);
        assert_eq!(config.port, 8080);
    }
}
