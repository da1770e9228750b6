use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic stream-source identifier for the video stream of every session.
pub const VIDEO_SSRC: u32 = 1;
/// Synthetic stream-source identifier for the audio stream of every session.
pub const AUDIO_SSRC: u32 = 2;

/// Protocol session token. Keys the registries by value; the canonical string
/// form is the lowercase hyphenated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Concatenated SRTP master key and salt. Opaque apart from its length.
#[derive(Clone, PartialEq, Eq)]
pub struct SrtpKeyMaterial(Vec<u8>);

impl SrtpKeyMaterial {
    pub fn concat(key: &[u8], salt: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(key.len() + salt.len());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(salt);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }
}

// Keys never end up in logs.
impl fmt::Debug for SrtpKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrtpKeyMaterial")
            .field("len", &self.0.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEndpoint {
    pub port: u16,
    pub srtp_key: Vec<u8>,
    pub srtp_salt: Vec<u8>,
}

impl MediaEndpoint {
    pub fn key_material(&self) -> SrtpKeyMaterial {
        SrtpKeyMaterial::concat(&self.srtp_key, &self.srtp_salt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    #[serde(rename = "targetAddress")]
    pub target_address: String,
    #[serde(rename = "localAddress", default)]
    pub local_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "v4")]
    V4,
    #[serde(rename = "v6")]
    V6,
}

impl AddressFamily {
    /// Dotted-quad literals are v4; anything else is treated as v6.
    pub fn classify(address: &str) -> Self {
        if address.trim().parse::<Ipv4Addr>().is_ok() {
            AddressFamily::V4
        } else {
            AddressFamily::V6
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResponse {
    pub address: String,
    #[serde(rename = "type")]
    pub family: AddressFamily,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResponse {
    pub port: u16,
    pub ssrc: u32,
    pub srtp_key: Vec<u8>,
    pub srtp_salt: Vec<u8>,
}

impl MediaResponse {
    pub(crate) fn echo(endpoint: &MediaEndpoint, ssrc: u32) -> Self {
        Self {
            port: endpoint.port,
            ssrc,
            srtp_key: endpoint.srtp_key.clone(),
            srtp_salt: endpoint.srtp_salt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaResponse>,
    pub address: AddressResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMedia {
    pub port: u16,
    pub key: SrtpKeyMaterial,
}

/// Negotiated-but-not-started session state recorded by Prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSession {
    pub address: String,
    pub video: Option<PendingMedia>,
    pub audio: Option<PendingMedia>,
}

impl PendingSession {
    pub(crate) fn from_request(request: &PrepareRequest) -> Self {
        let pending = |endpoint: &MediaEndpoint| PendingMedia {
            port: endpoint.port,
            key: endpoint.key_material(),
        };
        Self {
            address: request.target_address.clone(),
            video: request.video.as_ref().map(pending),
            audio: request.audio.as_ref().map(pending),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Start,
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRequest {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    /// Requested video bitrate in kbps.
    #[serde(default)]
    pub max_bit_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRequest {
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Ignored: audio is always sent at 64 kbps.
    #[serde(default)]
    pub max_bit_rate: Option<u32>,
    /// Packet duration in milliseconds.
    #[serde(default)]
    pub packet_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioRequest>,
}

impl StreamRequest {
    pub fn start(
        session_id: SessionId,
        video: Option<VideoRequest>,
        audio: Option<AudioRequest>,
    ) -> Self {
        Self {
            session_id,
            kind: RequestType::Start,
            video,
            audio,
        }
    }

    pub fn stop(session_id: SessionId) -> Self {
        Self {
            session_id,
            kind: RequestType::Stop,
            video: None,
            audio: None,
        }
    }
}
