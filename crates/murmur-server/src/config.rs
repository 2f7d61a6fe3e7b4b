use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

/// Encoding of command requests and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    Json,
    Msgpack,
}

impl WireCodec {
    /// Broadcast style used when none is configured explicitly.
    pub fn default_broadcast(self) -> BroadcastStyle {
        match self {
            Self::Json => BroadcastStyle::Text,
            Self::Msgpack => BroadcastStyle::Tagged,
        }
    }
}

impl FromStr for WireCodec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::Msgpack),
            other => bail!("unknown codec {:?} (expected json or msgpack)", other),
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Msgpack => f.write_str("msgpack"),
        }
    }
}

/// Shape of the events published on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStyle {
    /// One text frame: `"<topic> [<label>]: <text>"`.
    Text,
    /// Two frames: the topic, then a MessagePack payload.
    Tagged,
}

impl FromStr for BroadcastStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "tagged" => Ok(Self::Tagged),
            other => bail!("unknown broadcast style {:?} (expected text or tagged)", other),
        }
    }
}

impl fmt::Display for BroadcastStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Tagged => f.write_str("tagged"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub command_addr: String,
    /// Relay ingress the broadcast publisher connects to.
    pub publish_addr: String,
    pub codec: WireCodec,
    pub broadcast: BroadcastStyle,
    /// Reject `publish`/`message` naming a channel or user that does not exist.
    pub validate_references: bool,
    /// Rebuild the summary after every appended message.
    pub auto_summary: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            command_addr: "0.0.0.0:5556".into(),
            publish_addr: "127.0.0.1:5557".into(),
            codec: WireCodec::Msgpack,
            broadcast: WireCodec::Msgpack.default_broadcast(),
            validate_references: true,
            auto_summary: true,
        }
    }
}

impl ServerConfig {
    /// Read the `MURMUR_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let codec = match std::env::var("MURMUR_CODEC") {
            Ok(v) => v.parse::<WireCodec>().context("MURMUR_CODEC")?,
            Err(_) => defaults.codec,
        };
        let broadcast = match std::env::var("MURMUR_BROADCAST") {
            Ok(v) => v.parse::<BroadcastStyle>().context("MURMUR_BROADCAST")?,
            Err(_) => codec.default_broadcast(),
        };

        Ok(Self {
            data_dir: std::env::var("MURMUR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            command_addr: std::env::var("MURMUR_COMMAND_ADDR").unwrap_or(defaults.command_addr),
            publish_addr: std::env::var("MURMUR_PUBLISH_ADDR").unwrap_or(defaults.publish_addr),
            codec,
            broadcast,
            validate_references: env_flag("MURMUR_VALIDATE_REFERENCES", defaults.validate_references)?,
            auto_summary: env_flag("MURMUR_AUTO_SUMMARY", defaults.auto_summary)?,
        })
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(v) => parse_flag(&v).with_context(|| format!("{} must be true or false, got {:?}", name, v)),
        Err(_) => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
