//! Argument vector for the per-session ffmpeg process.
//!
//! Rendering is pure: identical inputs always produce identical arguments.

use crate::config::FfmpegSection;
use crate::session::{SrtpKeyMaterial, AUDIO_SSRC, VIDEO_SSRC};

pub const SRTP_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";
pub const AUDIO_BITRATE_KBPS: u32 = 64;
pub const AUDIO_SAMPLE_RATE_HZ: u32 = 24_000;
pub const AUDIO_CHANNELS: u32 = 1;
pub const AUDIO_CODEC: &str = "libopus";

const VIDEO_PAYLOAD_TYPE: u32 = 99;
const AUDIO_PAYLOAD_TYPE: u32 = 110;
const MAX_DELAY_US: u32 = 500_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpTarget {
    pub address: String,
    pub port: u16,
    pub key: SrtpKeyMaterial,
}

impl SrtpTarget {
    /// `srtp://` URL; RTCP goes to the same port as RTP.
    fn url(&self, packet_size: Option<u32>) -> String {
        let host = if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        };
        let mut url = format!("srtp://{}:{}?rtcpport={}", host, self.port, self.port);
        if let Some(size) = packet_size {
            url.push_str(&format!("&pkt_size={size}"));
        }
        url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutput {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub target: SrtpTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOutput {
    /// Opus frame duration in milliseconds, passed through verbatim.
    pub packet_time: u32,
    pub target: SrtpTarget,
}

#[derive(Debug, Clone)]
pub struct TranscodeCommandBuilder<'a> {
    source: &'a str,
    settings: &'a FfmpegSection,
}

impl<'a> TranscodeCommandBuilder<'a> {
    pub fn new(source: &'a str, settings: &'a FfmpegSection) -> Self {
        Self { source, settings }
    }

    pub fn build(&self, video: Option<&VideoOutput>, audio: Option<&AudioOutput>) -> Vec<String> {
        let mut args = self.base_args();
        if let Some(video) = video {
            self.push_video(&mut args, video);
        }
        if let Some(audio) = audio {
            self.push_audio(&mut args, audio);
        }
        args
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(level) = &self.settings.log_level {
            args.push("-loglevel".to_string());
            args.push(level.clone());
        }
        args.extend(self.source.split_whitespace().map(str::to_string));
        args
    }

    fn push_video(&self, args: &mut Vec<String>, video: &VideoOutput) {
        let bitrate = format!("{}k", video.bitrate_kbps);
        let fps = video.fps.to_string();
        let scale = format!("scale=w={}:h={}", video.width, video.height);
        let threads = self.settings.threads.to_string();
        let payload_type = VIDEO_PAYLOAD_TYPE.to_string();
        let ssrc = VIDEO_SSRC.to_string();
        let values: &[&str] = &[
            "-map",
            "0:v",
            "-codec:v",
            self.settings.video_codec.as_str(),
            "-x264opts",
            "colorprim=bt709:transfer=bt709:colormatrix=bt709:fullrange=off:analyse=0x3,0x133",
            "-movflags",
            "+faststart",
            "-an",
            "-framerate",
            fps.as_str(),
            "-pix_fmt",
            "yuv420p",
            "-tune",
            "zerolatency",
            "-vf",
            scale.as_str(),
            "-b:v",
            bitrate.as_str(),
            "-bufsize",
            bitrate.as_str(),
            "-strict",
            "experimental",
            "-flags",
            "+loop",
            "-i_qfactor",
            "0.71",
            "-rc_eq",
            "blurCplx^(1-qComp)",
            "-qcomp",
            "0.6",
            "-qmin",
            "10",
            "-qmax",
            "51",
            "-coder",
            "0",
            "-partitions",
            "parti4x4+partp8x8+partb8x8",
            "-subq",
            "5",
            "-threads",
            threads.as_str(),
            "-payload_type",
            payload_type.as_str(),
            "-ssrc",
            ssrc.as_str(),
        ];
        args.extend(values.iter().map(|value| value.to_string()));
        push_srtp_output(args, &video.target, Some(self.settings.packet_size));
    }

    fn push_audio(&self, args: &mut Vec<String>, audio: &AudioOutput) {
        let channels = AUDIO_CHANNELS.to_string();
        let resample = format!("aresample={AUDIO_SAMPLE_RATE_HZ}");
        let bitrate = format!("{AUDIO_BITRATE_KBPS}k");
        let frame_duration = audio.packet_time.to_string();
        let payload_type = AUDIO_PAYLOAD_TYPE.to_string();
        let ssrc = AUDIO_SSRC.to_string();
        let values: &[&str] = &[
            "-map",
            "0:a",
            "-vn",
            "-ac",
            channels.as_str(),
            "-af",
            resample.as_str(),
            "-codec:a",
            AUDIO_CODEC,
            "-b:a",
            bitrate.as_str(),
            "-application",
            "lowdelay",
            "-frame_duration",
            frame_duration.as_str(),
            "-compression_level",
            "10",
            "-dtx",
            "1",
            "-strict",
            "2",
            "-payload_type",
            payload_type.as_str(),
            "-ssrc",
            ssrc.as_str(),
        ];
        args.extend(values.iter().map(|value| value.to_string()));
        push_srtp_output(args, &audio.target, None);
    }
}

fn push_srtp_output(args: &mut Vec<String>, target: &SrtpTarget, packet_size: Option<u32>) {
    args.push("-f".to_string());
    args.push("rtp".to_string());
    args.push("-srtp_out_suite".to_string());
    args.push(SRTP_SUITE.to_string());
    args.push("-srtp_out_params".to_string());
    args.push(target.key.to_base64());
    args.push("-rtsp_transport".to_string());
    args.push("tcp".to_string());
    args.push("-max_delay".to_string());
    args.push(MAX_DELAY_US.to_string());
    args.push(target.url(packet_size));
}
