//! Advertised streaming capabilities.
//!
//! The catalog is derived once from the configured maxima and never changes
//! afterwards; it carries no per-session state.

use serde::{Serialize, Serializer};

/// Frame rate ceiling for every advertised and negotiated stream.
pub const MAX_FRAME_RATE: u32 = 30;

/// Reduced frame rate offered at the two smallest sizes.
pub const REDUCED_FRAME_RATE: u32 = 15;

const LADDER: [(u32, u32); 9] = [
    (320, 240),
    (320, 180),
    (480, 360),
    (480, 270),
    (640, 480),
    (640, 360),
    (1280, 960),
    (1280, 720),
    (1920, 1080),
];

/// Serialized as a `[width, height, frame_rate]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionEntry {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl ResolutionEntry {
    pub const fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

impl Serialize for ResolutionEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.width, self.height, self.frame_rate).serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionCatalog {
    entries: Vec<ResolutionEntry>,
}

impl ResolutionCatalog {
    pub fn build(max_width: u32, max_height: u32, max_frame_rate: u32) -> Self {
        let frame_rate = max_frame_rate.min(MAX_FRAME_RATE);
        let mut entries = Vec::new();
        for (width, height) in LADDER {
            if width > max_width || height > max_height {
                continue;
            }
            entries.push(ResolutionEntry::new(width, height, frame_rate));
            if width == 320 && frame_rate > REDUCED_FRAME_RATE {
                entries.push(ResolutionEntry::new(width, height, REDUCED_FRAME_RATE));
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[ResolutionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, width: u32, height: u32, frame_rate: u32) -> bool {
        self.entries
            .contains(&ResolutionEntry::new(width, height, frame_rate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AudioCodecKind {
    Opus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioCodecOption {
    #[serde(rename = "type")]
    pub kind: AudioCodecKind,
    /// Sample rate in kHz.
    pub samplerate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoCodecOption {
    pub profiles: Vec<u8>,
    pub levels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoOptions {
    pub resolutions: Vec<ResolutionEntry>,
    pub codec: VideoCodecOption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioOptions {
    pub codecs: Vec<AudioCodecOption>,
}

/// Capability descriptor handed to the registration layer for each stream
/// controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamOptions {
    /// RTP/RTCP mux proxy support.
    pub proxy: bool,
    /// SRTP with AES_CM_128_HMAC_SHA1_80.
    pub srtp: bool,
    pub video: VideoOptions,
    pub audio: AudioOptions,
}

impl StreamOptions {
    pub fn from_catalog(catalog: &ResolutionCatalog) -> Self {
        Self {
            proxy: false,
            srtp: true,
            video: VideoOptions {
                resolutions: catalog.entries().to_vec(),
                // H.264 main profile, level 4.0
                codec: VideoCodecOption {
                    profiles: vec![2],
                    levels: vec![2],
                },
            },
            audio: AudioOptions {
                codecs: vec![AudioCodecOption {
                    kind: AudioCodecKind::Opus,
                    samplerate: 24,
                }],
            },
        }
    }
}
