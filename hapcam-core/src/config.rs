use std::net::IpAddr;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CameraConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// ffmpeg input specifier, e.g. `-re -i rtsp://camera/stream`.
    #[serde(default)]
    pub source: Option<String>,
    /// Input specifier for snapshots; falls back to `source`.
    #[serde(default)]
    pub still_source: Option<String>,
    #[serde(default = "default_max_streams")]
    pub max_streams: u32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    #[serde(default)]
    pub advertise_address: Option<String>,
    #[serde(default)]
    pub ffmpeg: FfmpegSection,
}

impl CameraConfig {
    /// Minimal config for the given source, everything else defaulted.
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            source: Some(source.into()),
            still_source: None,
            max_streams: default_max_streams(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            max_fps: default_max_fps(),
            advertise_address: None,
            ffmpeg: FfmpegSection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.source()?;
        self.advertise_address()?;
        Ok(())
    }

    pub fn source(&self) -> Result<&str> {
        match self.source.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => Ok(source),
            _ => Err(ConfigError::MissingSource),
        }
    }

    pub fn still_source(&self) -> Result<&str> {
        match self.still_source.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => Ok(source),
            _ => self.source(),
        }
    }

    pub fn advertise_address(&self) -> Result<Option<IpAddr>> {
        let Some(value) = self.advertise_address.as_deref() else {
            return Ok(None);
        };
        value
            .trim()
            .parse::<IpAddr>()
            .map(Some)
            .map_err(|source| ConfigError::InvalidAddress {
                value: value.to_string(),
                source,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegSection {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            video_codec: default_video_codec(),
            threads: default_threads(),
            packet_size: default_packet_size(),
            log_level: None,
        }
    }
}

fn default_name() -> String {
    "Camera".to_string()
}

fn default_max_streams() -> u32 {
    2
}

fn default_max_width() -> u32 {
    1280
}

fn default_max_height() -> u32 {
    720
}

fn default_max_fps() -> u32 {
    30
}

fn default_binary() -> String {
    "ffmpeg".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_threads() -> u32 {
    5
}

fn default_packet_size() -> u32 {
    1378
}

pub fn load_camera_config<P: AsRef<Path>>(path: P) -> Result<CameraConfig> {
    let config: CameraConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_camera_config(content: &str, origin: &Path) -> Result<CameraConfig> {
    let config: CameraConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        source,
        path: origin.to_path_buf(),
    })?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
