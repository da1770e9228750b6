pub mod camera;
pub mod catalog;
pub mod config;
pub mod error;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod transcode;

pub use camera::CameraStreaming;
pub use catalog::{ResolutionCatalog, ResolutionEntry, StreamOptions, MAX_FRAME_RATE};
pub use config::{load_camera_config, parse_camera_config, CameraConfig, FfmpegSection};
pub use error::{ConfigError, Result};
pub use session::{
    AddressFamily, AudioRequest, MediaEndpoint, OngoingSummary, PrepareRequest, PrepareResponse,
    RequestType, SessionError, SessionId, SessionManager, StartOutcome, StopOutcome,
    StreamRequest, StreamRequestOutcome, VideoRequest,
};
pub use snapshot::{CommandExecutor, SnapshotCapture, SnapshotError, SystemCommandExecutor};
pub use supervisor::{ProcessHandle, ProcessSpawner, SystemProcessSpawner};
pub use transcode::{AudioOutput, SrtpTarget, TranscodeCommandBuilder, VideoOutput};
