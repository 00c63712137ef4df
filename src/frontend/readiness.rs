//! Startup readiness probing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::frontend::process::{FrontEndProcess, ProcessState};
use crate::frontend::SupervisorError;

/// Poll `addr` until something accepts connections on it.
///
/// Fails with `StartupFailed` as soon as the process is seen to exit, and with
/// `StartupTimeout` when the deadline passes while it is still alive.
pub async fn wait_for_listener(
    process: &mut dyn FrontEndProcess,
    addr: SocketAddr,
    interval: Duration,
    timeout: Duration,
) -> Result<(), SupervisorError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let ProcessState::Exited(code) = process.state()? {
            return Err(SupervisorError::StartupFailed { code });
        }

        match time::timeout(interval, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                tracing::debug!(address = %addr, "Front end is listening");
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::trace!(address = %addr, error = %e, "Front end not listening yet")
            }
            Err(_) => tracing::trace!(address = %addr, "Readiness probe timed out"),
        }

        if Instant::now() >= deadline {
            return Err(SupervisorError::StartupTimeout(timeout));
        }
        time::sleep(interval).await;
    }
}
