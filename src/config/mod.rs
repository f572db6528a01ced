use serde::{Deserialize, Serialize};
use std::fs;

use anyhow::{Context, bail};

use crate::encoder::PoolConfig;
use crate::port::{PortCodec, PortFormat};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortSection {
    #[serde(default = "default_codec")]
    pub codec: PortCodec,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Pre-trigger window sizing: either a byte budget or seconds of video at
/// the configured bitrate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RingSection {
    pub seconds: Option<u32>,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureSection {
    pub enabled: bool,
    pub dir: String,
    pub trigger_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub node_name: String,
    #[serde(default)]
    pub port: PortSection,
    #[serde(default)]
    pub ring: RingSection,
    #[serde(default)]
    pub capture: CaptureSection,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path))?;
        let config: Self = toml::from_str(&content)?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.trim().is_empty() {
            bail!("node_name must not be empty");
        }
        if self.port.width == 0 || self.port.height == 0 {
            bail!("port resolution must be non-zero");
        }
        if self.port.framerate == 0 {
            bail!("port framerate must be > 0");
        }
        if self.port.buffer_count < 2 {
            bail!("port.buffer_count must be >= 2");
        }
        if self.ring.seconds.is_some() && self.ring.bytes.is_some() {
            bail!("ring window: set either seconds or bytes, not both");
        }
        if self.capture.enabled && self.capture.trigger_interval_secs == 0 {
            bail!("capture.trigger_interval_secs must be > 0");
        }
        Ok(())
    }

    pub fn port_format(&self) -> PortFormat {
        PortFormat {
            codec: self.port.codec,
            width: self.port.width,
            height: self.port.height,
            framerate: self.port.framerate,
            bitrate: self.port.bitrate,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            buffer_count: self.port.buffer_count,
            buffer_size: self.port.buffer_size,
        }
    }

    /// The pre-trigger window in bytes.
    pub fn ring_limit(&self) -> u64 {
        if let Some(bytes) = self.ring.bytes {
            return bytes;
        }
        let seconds = self.ring.seconds.unwrap_or(5);
        self.port.bitrate as u64 / 8 * (seconds as u64 + 1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "camlift-node".to_string(),
            port: PortSection::default(),
            ring: RingSection::default(),
            capture: CaptureSection::default(),
        }
    }
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            bitrate: default_bitrate(),
            buffer_count: default_buffer_count(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "clips".to_string(),
            trigger_interval_secs: 10,
        }
    }
}

fn default_codec() -> PortCodec {
    PortCodec::H264
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_framerate() -> u32 {
    30
}
fn default_bitrate() -> u32 {
    17_000_000
}
fn default_buffer_count() -> usize {
    4
}
fn default_buffer_size() -> usize {
    16 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.port.codec, PortCodec::H264);
        // 5s window at 17 Mbit/s plus slack.
        assert_eq!(cfg.ring_limit(), 17_000_000 / 8 * 6);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let cfg: Config = toml::from_str(
            r#"
            node_name = "bench-cam"

            [port]
            codec = "h264"
            width = 1280
            height = 720

            [ring]
            bytes = 1048576

            [capture]
            enabled = false
            dir = "out"
            trigger_interval_secs = 30
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.port.width, 1280);
        assert_eq!(cfg.port.framerate, 30);
        assert_eq!(cfg.ring_limit(), 1_048_576);
        assert!(!cfg.capture.enabled);
    }

    #[test]
    fn test_validate_rejects_conflicting_ring_window() {
        let mut cfg = Config::default();
        cfg.ring.seconds = Some(5);
        cfg.ring.bytes = Some(1024);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_pool() {
        let mut cfg = Config::default();
        cfg.port.buffer_count = 1;
        assert!(cfg.validate().is_err());
    }
}
