#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use hapcam_core::{MediaEndpoint, ProcessHandle, ProcessSpawner, SessionId};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn endpoint(port: u16, fill: u8) -> MediaEndpoint {
    MediaEndpoint {
        port,
        srtp_key: vec![fill; 16],
        srtp_salt: vec![fill.wrapping_add(1); 14],
    }
}

pub fn session(n: u8) -> SessionId {
    SessionId::from_bytes([n; 16])
}

#[derive(Debug, Default)]
pub struct SpawnLog {
    pub spawns: Vec<(PathBuf, Vec<String>)>,
    pub kills: HashMap<u32, usize>,
    pub exited: HashSet<u32>,
}

pub type SharedLog = Arc<Mutex<SpawnLog>>;

pub struct RecordingSpawner {
    log: SharedLog,
    next_pid: AtomicU32,
    fail: bool,
}

impl RecordingSpawner {
    pub fn build() -> (Arc<dyn ProcessSpawner>, SharedLog) {
        Self::with_failure(false)
    }

    pub fn failing() -> (Arc<dyn ProcessSpawner>, SharedLog) {
        Self::with_failure(true)
    }

    fn with_failure(fail: bool) -> (Arc<dyn ProcessSpawner>, SharedLog) {
        let log: SharedLog = Arc::new(Mutex::new(SpawnLog::default()));
        let spawner: Arc<dyn ProcessSpawner> = Arc::new(Self {
            log: Arc::clone(&log),
            next_pid: AtomicU32::new(1000),
            fail,
        });
        (spawner, log)
    }
}

impl ProcessSpawner for RecordingSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn ProcessHandle>> {
        self.log
            .lock()
            .unwrap()
            .spawns
            .push((program.to_path_buf(), args.to_vec()));
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg not found"));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            pid,
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    log: SharedLog,
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn kill(&mut self) -> io::Result<()> {
        *self.log.lock().unwrap().kills.entry(self.pid).or_insert(0) += 1;
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let exited = self.log.lock().unwrap().exited.contains(&self.pid);
        Ok(exited.then(|| ExitStatus::from_raw(0)))
    }
}

pub fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
        .collect()
}
