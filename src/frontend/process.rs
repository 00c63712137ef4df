//! Front-end process boundary.
//!
//! The supervisor only talks to [`FrontEndProcess`]. The httpd adapter is the
//! one place where `reload()` and `terminate()` become POSIX signals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::frontend::SupervisorError;

/// Observed state of the front-end process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited with this code; `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Control surface of one front-end process.
#[async_trait]
pub trait FrontEndProcess: Send {
    /// Launch the process against `config_path`, returning its pid.
    fn spawn(&mut self, config_path: &Path) -> Result<u32, SupervisorError>;

    /// Non-blocking state check.
    fn state(&mut self) -> Result<ProcessState, SupervisorError>;

    /// Ask the process to re-read its configuration.
    fn reload(&mut self) -> Result<(), SupervisorError>;

    /// Stop the process, killing it once `grace` has elapsed.
    async fn terminate(&mut self, grace: Duration) -> Result<(), SupervisorError>;
}

/// Apache httpd run in the foreground.
///
/// SIGUSR1 is httpd's graceful restart: it re-reads the configuration without
/// dropping in-flight requests.
#[derive(Debug)]
pub struct HttpdProcess {
    binary: PathBuf,
    child: Option<Child>,
}

impl HttpdProcess {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            child: None,
        }
    }

    fn pid(&self) -> Result<Pid, SupervisorError> {
        let child = self.child.as_ref().ok_or(SupervisorError::NotRunning)?;
        let pid = child.id().ok_or(SupervisorError::NotRunning)?;
        Ok(Pid::from_raw(pid as i32))
    }

    fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
        let pid = self.pid()?;
        kill(pid, signal).map_err(|e| SupervisorError::Signal {
            signal: signal.as_str(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl FrontEndProcess for HttpdProcess {
    fn spawn(&mut self, config_path: &Path) -> Result<u32, SupervisorError> {
        if self.child.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        let child = Command::new(&self.binary)
            .arg("-f")
            .arg(config_path)
            .arg("-DFOREGROUND")
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().ok_or(SupervisorError::NotRunning)?;
        self.child = Some(child);
        Ok(pid)
    }

    fn state(&mut self) -> Result<ProcessState, SupervisorError> {
        let child = self.child.as_mut().ok_or(SupervisorError::NotRunning)?;
        match child.try_wait()? {
            Some(status) => Ok(ProcessState::Exited(status.code())),
            None => Ok(ProcessState::Running),
        }
    }

    fn reload(&mut self) -> Result<(), SupervisorError> {
        self.signal(Signal::SIGUSR1)
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), SupervisorError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "Failed to send SIGTERM to front end");
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(?status, "Front end exited");
            }
            Err(_) => {
                tracing::warn!(grace_secs = grace.as_secs(), "Front end ignored SIGTERM, killing");
                child.kill().await?;
            }
        }
        Ok(())
    }
}
