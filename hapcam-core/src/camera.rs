//! Camera accessory surface composed from the catalog, the session manager
//! and the snapshot path. This is what the registration layer talks to.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{ResolutionCatalog, StreamOptions};
use crate::config::CameraConfig;
use crate::error::Result;
use crate::session::{
    PrepareRequest, PrepareResponse, SessionId, SessionManager, SessionResult, StreamRequest,
    StreamRequestOutcome,
};
use crate::snapshot::{CommandExecutor, SnapshotCapture, SnapshotError};
use crate::supervisor::ProcessSpawner;

#[derive(Debug)]
pub struct CameraStreaming {
    config: CameraConfig,
    catalog: ResolutionCatalog,
    options: StreamOptions,
    local_address: IpAddr,
    sessions: SessionManager,
    snapshots: SnapshotCapture,
}

impl CameraStreaming {
    /// Fails with `ConfigError::MissingSource` when no source is configured.
    pub fn new(config: CameraConfig) -> Result<Self> {
        config.validate()?;
        let source = config.source()?.to_string();
        let still_source = config.still_source()?.to_string();
        let local_address = match config.advertise_address()? {
            Some(address) => address,
            None => discover_local_address(),
        };
        let catalog = ResolutionCatalog::build(config.max_width, config.max_height, config.max_fps);
        let options = StreamOptions::from_catalog(&catalog);
        let sessions = SessionManager::new(source, config.ffmpeg.clone(), None);
        let snapshots = SnapshotCapture::new(&config.ffmpeg.binary, still_source, None);
        info!(
            camera = %config.name,
            resolutions = catalog.len(),
            streams = config.max_streams,
            address = %local_address,
            "camera streaming ready"
        );
        Ok(Self {
            config,
            catalog,
            options,
            local_address,
            sessions,
            snapshots,
        })
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Result<Self> {
        let source = self.config.source()?.to_string();
        self.sessions = SessionManager::new(source, self.config.ffmpeg.clone(), Some(spawner));
        Ok(self)
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let still_source = self.config.still_source()?.to_string();
        self.snapshots =
            SnapshotCapture::new(&self.config.ffmpeg.binary, still_source, Some(executor));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn catalog(&self) -> &ResolutionCatalog {
        &self.catalog
    }

    pub fn stream_options(&self) -> &StreamOptions {
        &self.options
    }

    /// Number of stream controllers the registration layer should create.
    pub fn stream_count(&self) -> u32 {
        self.config.max_streams
    }

    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// A blank `local_address` is filled with this accessory's address.
    pub fn prepare_stream(&self, mut request: PrepareRequest) -> PrepareResponse {
        if request.local_address.trim().is_empty() {
            request.local_address = self.local_address.to_string();
        }
        self.sessions.prepare(&request)
    }

    pub fn handle_stream_request(
        &self,
        request: &StreamRequest,
    ) -> SessionResult<StreamRequestOutcome> {
        self.sessions.handle_stream_request(request)
    }

    /// Stops the sessions the registration layer associates with a closed
    /// connection. Returns how many transcoders were signalled.
    pub fn handle_close_connection<I>(&self, connection_id: &str, sessions: I) -> usize
    where
        I: IntoIterator<Item = SessionId>,
    {
        let stopped = self.sessions.stop_all(sessions);
        debug!(connection = connection_id, stopped, "connection closed");
        stopped
    }

    pub async fn snapshot(
        &self,
        width: u32,
        height: u32,
    ) -> std::result::Result<Vec<u8>, SnapshotError> {
        self.snapshots.capture(width, height).await
    }
}

/// Address of the interface that routes outbound traffic, or loopback when
/// none can be determined.
fn discover_local_address() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(address) if !address.is_unspecified() => address,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(error) => {
            warn!(%error, "local address lookup failed; advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
