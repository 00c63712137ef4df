use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Socket the daemon listens on by default.
pub const DEFAULT_SOCKET_PATH: &str = "/run/vhost-registrar/api.socket";

/// Reconnect interval used by [`PersistentClient`] by default.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode registration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid registration: {0}")]
    InvalidRegistration(&'static str),
}

/// One registration message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Registration {
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
}

impl Registration {
    /// Forward `domain_name` to `http://127.0.0.1:<port>/`.
    pub fn http(domain_name: impl Into<String>, port: u16) -> Self {
        Self {
            domain_name: domain_name.into(),
            http_port: Some(port),
            https_port: None,
        }
    }

    /// Forward `domain_name` to `https://127.0.0.1:<port>/`.
    pub fn https(domain_name: impl Into<String>, port: u16) -> Self {
        Self {
            domain_name: domain_name.into(),
            http_port: None,
            https_port: Some(port),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.domain_name.trim().is_empty() {
            return Err(ClientError::InvalidRegistration("empty domain name"));
        }
        if self.http_port.is_none() && self.https_port.is_none() {
            return Err(ClientError::InvalidRegistration("no port given"));
        }
        if self.http_port == Some(0) || self.https_port == Some(0) {
            return Err(ClientError::InvalidRegistration("port 0"));
        }
        Ok(())
    }

    /// Newline-terminated JSON frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ClientError> {
        self.validate()?;
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }
}

/// A single registration connection.
///
/// The daemon drops the registration when this connection closes.
pub struct RegistrarClient {
    stream: UnixStream,
}

impl RegistrarClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self { stream })
    }

    /// Send a registration. Later calls replace the earlier one.
    pub async fn register(&mut self, registration: &Registration) -> Result<(), ClientError> {
        let frame = registration.to_frame()?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait until the daemon closes the connection.
    pub async fn closed(&mut self) -> std::io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            if self.stream.read(&mut buf).await? == 0 {
                return Ok(());
            }
        }
    }

    /// Close the connection, withdrawing the registration.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Keeps a registration alive across daemon restarts.
///
/// Reconnects every retry interval while the socket is missing or after the
/// connection drops, and resends the latest registration each time.
pub struct PersistentClient {
    updates: watch::Sender<Option<Registration>>,
    task: JoinHandle<()>,
}

impl PersistentClient {
    /// Start the background connection task. Must be called within a Tokio runtime.
    pub fn spawn(socket_path: impl Into<PathBuf>, retry_interval: Duration) -> Self {
        let (updates, rx) = watch::channel(None);
        let task = tokio::spawn(maintain(socket_path.into(), retry_interval, rx));
        Self { updates, task }
    }

    /// Replace the registration; sent immediately when connected.
    pub fn register(&self, registration: Registration) -> Result<(), ClientError> {
        registration.validate()?;
        self.updates.send_replace(Some(registration));
        Ok(())
    }

    /// Close the connection and stop retrying.
    pub async fn stop(self) {
        drop(self.updates);
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "Registration task ended abnormally");
        }
    }
}

async fn maintain(
    path: PathBuf,
    retry_interval: Duration,
    mut rx: watch::Receiver<Option<Registration>>,
) {
    loop {
        match RegistrarClient::connect(&path).await {
            Ok(mut client) => {
                tracing::info!(socket = %path.display(), "Connected to registrar");
                if !serve(&mut client, &mut rx).await {
                    let _ = client.close().await;
                    return;
                }
                tracing::warn!(
                    retry_secs = retry_interval.as_secs(),
                    "Registrar connection lost, retrying later"
                );
            }
            Err(e) => tracing::warn!(
                socket = %path.display(),
                error = %e,
                retry_secs = retry_interval.as_secs(),
                "Failed to connect to registrar, retrying later"
            ),
        }

        if !wait_retry(retry_interval, &mut rx).await {
            return;
        }
    }
}

/// Send the current registration and every update until the connection
/// drops. Returns false once the owner has stopped the client.
async fn serve(
    client: &mut RegistrarClient,
    rx: &mut watch::Receiver<Option<Registration>>,
) -> bool {
    let current = rx.borrow_and_update().clone();
    if let Some(registration) = current {
        if let Err(e) = client.register(&registration).await {
            tracing::warn!(error = %e, "Failed to send registration");
            return true;
        }
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return false;
                }
                let current = rx.borrow_and_update().clone();
                if let Some(registration) = current {
                    if let Err(e) = client.register(&registration).await {
                        tracing::warn!(error = %e, "Failed to send registration");
                        return true;
                    }
                    tracing::debug!(domain = %registration.domain_name, "Registration updated");
                }
            }
            _ = client.closed() => return true,
        }
    }
}

/// Sleep for one retry interval. Returns false if the owner stopped the client.
async fn wait_retry(interval: Duration, rx: &mut watch::Receiver<Option<Registration>>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}
