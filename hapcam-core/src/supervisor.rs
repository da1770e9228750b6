//! Launching and signalling transcoder processes.
//!
//! Termination is request-only: `kill` delivers SIGKILL and returns without
//! waiting for the process to exit.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tracing::debug;

pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Sends SIGKILL without waiting for the process to exit.
    fn kill(&mut self) -> io::Result<()>;

    /// Non-blocking exit check; reaps the process if it has exited.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Spawns real processes with `tokio::process`. Outside a tokio runtime the
/// spawn fails with an error instead of launching anything.
#[derive(Debug, Default)]
pub struct SystemProcessSpawner;

impl ProcessSpawner for SystemProcessSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn ProcessHandle>> {
        Handle::try_current().map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!(program = %program.display(), pid = child.id(), "process spawned");
        Ok(Box::new(ChildProcess {
            child,
            program: program.to_path_buf(),
        }))
    }
}

pub struct ChildProcess {
    child: Child,
    program: PathBuf,
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .finish()
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}
