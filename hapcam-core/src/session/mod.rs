//! Two-phase stream negotiation: Prepare records a pending session, Start
//! promotes it to an ongoing transcoder process, Stop kills that process.
//!
//! Callers must serialize operations for a single session identifier: Start
//! only after the matching Prepare has returned, and never Stop concurrently
//! with Start. Operations on distinct sessions may run concurrently; the
//! registry locks are held only for map access, never across a spawn.

pub mod error;
pub mod types;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::MAX_FRAME_RATE;
use crate::config::FfmpegSection;
use crate::supervisor::{ProcessHandle, ProcessSpawner, SystemProcessSpawner};
use crate::transcode::{AudioOutput, SrtpTarget, TranscodeCommandBuilder, VideoOutput};

pub use self::error::{SessionError, SessionResult};
pub use self::types::{
    AddressFamily, AddressResponse, AudioRequest, MediaEndpoint, MediaResponse, PendingMedia,
    PendingSession, PrepareRequest, PrepareResponse, RequestType, SessionId, SrtpKeyMaterial,
    StreamRequest, VideoRequest, AUDIO_SSRC, VIDEO_SSRC,
};

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_VIDEO_BITRATE_KBPS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    /// No pending session under this identifier; nothing was spawned.
    NoPendingSession,
    /// The pending session negotiated no media usable by the request.
    NothingToStream,
    /// The transcoder failed to launch; the session is not ongoing.
    SpawnFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotOngoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRequestOutcome {
    Start(StartOutcome),
    Stop(StopOutcome),
}

struct OngoingSession {
    process: Box<dyn ProcessHandle>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OngoingSummary {
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

pub struct SessionManager {
    source: String,
    ffmpeg: FfmpegSection,
    spawner: Arc<dyn ProcessSpawner>,
    pending: Mutex<HashMap<SessionId, PendingSession>>,
    ongoing: Mutex<HashMap<SessionId, OngoingSession>>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("source", &self.source)
            .field("ffmpeg", &self.ffmpeg)
            .field("pending", &self.pending_count())
            .field("ongoing", &self.ongoing_count())
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        source: impl Into<String>,
        ffmpeg: FfmpegSection,
        spawner: Option<Arc<dyn ProcessSpawner>>,
    ) -> Self {
        let spawner = spawner.unwrap_or_else(|| Arc::new(SystemProcessSpawner));
        Self {
            source: source.into(),
            ffmpeg,
            spawner,
            pending: Mutex::new(HashMap::new()),
            ongoing: Mutex::new(HashMap::new()),
        }
    }

    /// Records a pending session and echoes back what the viewer needs.
    ///
    /// A second Prepare for the same identifier overwrites the first.
    pub fn prepare(&self, request: &PrepareRequest) -> PrepareResponse {
        let session = PendingSession::from_request(request);
        let response = PrepareResponse {
            video: request
                .video
                .as_ref()
                .map(|endpoint| MediaResponse::echo(endpoint, VIDEO_SSRC)),
            audio: request
                .audio
                .as_ref()
                .map(|endpoint| MediaResponse::echo(endpoint, AUDIO_SSRC)),
            address: AddressResponse {
                address: request.local_address.clone(),
                family: AddressFamily::classify(&request.local_address),
            },
        };

        let replaced = self
            .lock_pending()
            .insert(request.session_id, session)
            .is_some();
        if replaced {
            debug!(session = %request.session_id, "pending session overwritten");
        }
        debug!(
            session = %request.session_id,
            target = %request.target_address,
            video = request.video.is_some(),
            audio = request.audio.is_some(),
            "session prepared"
        );
        response
    }

    pub fn start(
        &self,
        session_id: SessionId,
        video: Option<&VideoRequest>,
        audio: Option<&AudioRequest>,
    ) -> SessionResult<StartOutcome> {
        let Some(pending) = self.lock_pending().remove(&session_id) else {
            debug!(session = %session_id, "start ignored: no pending session");
            return Ok(StartOutcome::NoPendingSession);
        };

        let video_output = match (&pending.video, video) {
            (Some(media), request) => {
                Some(negotiate_video(session_id, &pending, media, request)?)
            }
            (None, _) => None,
        };
        let audio_output = match (&pending.audio, audio) {
            (Some(media), Some(request)) => {
                Some(negotiate_audio(session_id, &pending, media, request)?)
            }
            (Some(_), None) => {
                debug!(session = %session_id, "no audio request; streaming video only");
                None
            }
            (None, _) => None,
        };
        if video_output.is_none() && audio_output.is_none() {
            warn!(session = %session_id, "start ignored: no media negotiated");
            return Ok(StartOutcome::NothingToStream);
        }

        let args = TranscodeCommandBuilder::new(&self.source, &self.ffmpeg)
            .build(video_output.as_ref(), audio_output.as_ref());
        debug!(
            session = %session_id,
            command = %redacted_command_line(&self.ffmpeg.binary, &args),
            "launching transcoder"
        );

        let process = match self.spawner.spawn(Path::new(&self.ffmpeg.binary), &args) {
            Ok(process) => process,
            Err(error) => {
                warn!(
                    session = %session_id,
                    %error,
                    binary = %self.ffmpeg.binary,
                    "transcoder failed to launch"
                );
                return Ok(StartOutcome::SpawnFailed);
            }
        };
        let pid = process.id();
        let previous = self.lock_ongoing().insert(
            session_id,
            OngoingSession {
                process,
                started_at: Utc::now(),
            },
        );
        if let Some(mut previous) = previous {
            warn!(session = %session_id, "ongoing session replaced; killing old transcoder");
            kill_process(session_id, previous.process.as_mut());
        }
        info!(session = %session_id, pid, "stream started");
        Ok(StartOutcome::Started { pid })
    }

    pub fn stop(&self, session_id: SessionId) -> StopOutcome {
        let Some(mut session) = self.lock_ongoing().remove(&session_id) else {
            debug!(session = %session_id, "stop ignored: no ongoing session");
            return StopOutcome::NotOngoing;
        };
        kill_process(session_id, session.process.as_mut());
        info!(session = %session_id, pid = session.process.id(), "stream stopped");
        StopOutcome::Stopped
    }

    /// Unified entry point for `start`/`stop` requests from the controller.
    pub fn handle_stream_request(
        &self,
        request: &StreamRequest,
    ) -> SessionResult<StreamRequestOutcome> {
        match request.kind {
            RequestType::Start => self
                .start(
                    request.session_id,
                    request.video.as_ref(),
                    request.audio.as_ref(),
                )
                .map(StreamRequestOutcome::Start),
            RequestType::Stop => Ok(StreamRequestOutcome::Stop(self.stop(request.session_id))),
        }
    }

    /// Stops every listed session; returns how many were ongoing.
    pub fn stop_all<I>(&self, sessions: I) -> usize
    where
        I: IntoIterator<Item = SessionId>,
    {
        sessions
            .into_iter()
            .filter(|session_id| self.stop(*session_id) == StopOutcome::Stopped)
            .count()
    }

    /// Kills every ongoing transcoder.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<(SessionId, OngoingSession)> = self.lock_ongoing().drain().collect();
        let count = drained.len();
        for (session_id, mut session) in drained {
            kill_process(session_id, session.process.as_mut());
        }
        if count > 0 {
            info!(count, "all streams stopped");
        }
        count
    }

    /// Drops ongoing sessions whose transcoder already exited on its own.
    pub fn reap_exited(&self) -> Vec<(SessionId, ExitStatus)> {
        let mut ongoing = self.lock_ongoing();
        let mut exited = Vec::new();
        for (session_id, session) in ongoing.iter_mut() {
            match session.process.try_wait() {
                Ok(Some(status)) => exited.push((*session_id, status)),
                Ok(None) => {}
                Err(error) => {
                    warn!(session = %session_id, %error, "failed to poll transcoder status")
                }
            }
        }
        for (session_id, status) in &exited {
            ongoing.remove(session_id);
            info!(session = %session_id, %status, "transcoder exited; session removed");
        }
        exited
    }

    pub fn is_pending(&self, session_id: SessionId) -> bool {
        self.lock_pending().contains_key(&session_id)
    }

    pub fn is_ongoing(&self, session_id: SessionId) -> bool {
        self.lock_ongoing().contains_key(&session_id)
    }

    pub fn pending_session(&self, session_id: SessionId) -> Option<PendingSession> {
        self.lock_pending().get(&session_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn ongoing_count(&self) -> usize {
        self.lock_ongoing().len()
    }

    pub fn ongoing_sessions(&self) -> Vec<OngoingSummary> {
        let mut sessions: Vec<OngoingSummary> = self
            .lock_ongoing()
            .iter()
            .map(|(session_id, session)| OngoingSummary {
                session_id: *session_id,
                pid: session.process.id(),
                started_at: session.started_at,
            })
            .collect();
        sessions.sort_by_key(|summary| summary.started_at);
        sessions
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<SessionId, PendingSession>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_ongoing(&self) -> MutexGuard<'_, HashMap<SessionId, OngoingSession>> {
        self.ongoing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

fn negotiate_video(
    session_id: SessionId,
    pending: &PendingSession,
    media: &PendingMedia,
    request: Option<&VideoRequest>,
) -> SessionResult<VideoOutput> {
    let (width, height, fps, bitrate_kbps) = match request {
        Some(request) => {
            let missing = |field| SessionError::MissingField {
                session: session_id,
                media: "video",
                field,
            };
            (
                request.width.ok_or_else(|| missing("width"))?,
                request.height.ok_or_else(|| missing("height"))?,
                request.fps.ok_or_else(|| missing("fps"))?,
                request.max_bit_rate.ok_or_else(|| missing("max_bit_rate"))?,
            )
        }
        None => (
            DEFAULT_WIDTH,
            DEFAULT_HEIGHT,
            MAX_FRAME_RATE,
            DEFAULT_VIDEO_BITRATE_KBPS,
        ),
    };
    Ok(VideoOutput {
        width,
        height,
        fps: fps.min(MAX_FRAME_RATE),
        bitrate_kbps,
        target: SrtpTarget {
            address: pending.address.clone(),
            port: media.port,
            key: media.key.clone(),
        },
    })
}

fn negotiate_audio(
    session_id: SessionId,
    pending: &PendingSession,
    media: &PendingMedia,
    request: &AudioRequest,
) -> SessionResult<AudioOutput> {
    let packet_time = request
        .packet_time
        .ok_or(SessionError::MissingField {
            session: session_id,
            media: "audio",
            field: "packet_time",
        })?;
    Ok(AudioOutput {
        packet_time,
        target: SrtpTarget {
            address: pending.address.clone(),
            port: media.port,
            key: media.key.clone(),
        },
    })
}

fn kill_process(session_id: SessionId, process: &mut dyn ProcessHandle) {
    if let Err(error) = process.kill() {
        warn!(session = %session_id, pid = process.id(), %error, "failed to signal transcoder");
    }
}

fn redacted_command_line(binary: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(binary);
    let mut redact_next = false;
    for arg in args {
        parts.push(if redact_next { "<redacted>" } else { arg.as_str() });
        redact_next = arg == "-srtp_out_params";
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_hides_key_material() {
        let args = vec![
            "-i".to_string(),
            "src".to_string(),
            "-srtp_out_params".to_string(),
            "c2VjcmV0".to_string(),
            "srtp://10.0.0.2:5000".to_string(),
        ];
        assert_eq!(
            redacted_command_line("ffmpeg", &args),
            "ffmpeg -i src -srtp_out_params <redacted> srtp://10.0.0.2:5000"
        );
    }
}
