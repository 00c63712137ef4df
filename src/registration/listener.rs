//! Unix socket listener for registration clients.
//!
//! # Responsibilities
//! - Bind the socket path, replacing a stale socket file
//! - Accept connections and spawn one frame reader per connection
//! - Enforce the frame size limit
//! - Bound concurrent connections with a semaphore
//! - Apply backpressure: readers wait for queue space before reading on
//! - Remove the socket file on close

use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::Sender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::observability::metrics;
use crate::registration::connection::ConnectionId;
use crate::registration::protocol::parse_frame;
use crate::registration::ChannelEvent;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind the socket path.
    Bind(std::io::Error),
    /// Failed to accept a connection.
    Accept(std::io::Error),
    /// The connection limit was shut down.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Accepts registration connections on a Unix socket.
pub struct RegistrationListener {
    inner: UnixListener,
    path: PathBuf,
    max_frame_bytes: usize,
    events: Sender<ChannelEvent>,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    readers: JoinSet<()>,
}

impl RegistrationListener {
    /// Bind `path`. Frames longer than `max_frame_bytes` are discarded; at
    /// most `max_connections` clients are read from at once.
    pub fn bind(
        path: &Path,
        max_frame_bytes: usize,
        max_connections: usize,
        events: Sender<ChannelEvent>,
    ) -> Result<Self, ListenerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ListenerError::Bind)?;
        }
        remove_stale_socket(path).map_err(ListenerError::Bind)?;

        let inner = UnixListener::bind(path).map_err(ListenerError::Bind)?;
        tracing::info!(
            path = %path.display(),
            max_connections,
            "Registration socket bound"
        );

        Ok(Self {
            inner,
            path: path.to_path_buf(),
            max_frame_bytes,
            events,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            readers: JoinSet::new(),
        })
    }

    /// Accept one connection and start reading its frames.
    ///
    /// Waits for a free connection slot before accepting.
    pub async fn accept(&mut self) -> Result<ConnectionId, ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, _addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        while self.readers.try_join_next().is_some() {}

        let id = ConnectionId::new();
        tracing::debug!(
            connection_id = %id,
            available_permits = self.connection_limit.available_permits(),
            "Registration client connected"
        );
        let reader = FrameReader {
            id,
            max_frame_bytes: self.max_frame_bytes,
            events: self.events.clone(),
            _permit: permit,
        };
        self.readers.spawn(reader.run(stream));
        Ok(id)
    }

    /// Free connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop all readers and remove the socket file.
    ///
    /// Readers stopped here do not report `Disconnected`.
    pub fn close(mut self) {
        self.readers.abort_all();
        drop(self.inner);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
        tracing::info!(path = %self.path.display(), "Registration socket closed");
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Reads one connection. Holding the permit keeps its connection slot taken.
struct FrameReader {
    id: ConnectionId,
    max_frame_bytes: usize,
    events: Sender<ChannelEvent>,
    _permit: OwnedSemaphorePermit,
}

impl FrameReader {
    /// Read newline-terminated frames until EOF, forwarding valid ones.
    ///
    /// Nothing more is read while the event queue is full.
    async fn run(self, stream: UnixStream) {
        let id = self.id;
        let mut reader = BufReader::new(stream);
        let limit = self.max_frame_bytes as u64 + 1;
        let mut frame = Vec::new();

        loop {
            frame.clear();
            match (&mut reader).take(limit).read_until(b'\n', &mut frame).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Read failed");
                    break;
                }
            }

            if frame.last() != Some(&b'\n') {
                if frame.len() as u64 >= limit {
                    tracing::debug!(
                        connection_id = %id,
                        limit = self.max_frame_bytes,
                        "Dropping oversize frame"
                    );
                    metrics::record_message("oversize");
                    match skip_line(&mut reader).await {
                        Ok(true) => continue,
                        _ => break,
                    }
                }
                tracing::debug!(
                    connection_id = %id,
                    bytes = frame.len(),
                    "Dropping unterminated frame at EOF"
                );
                break;
            }
            frame.pop();
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match parse_frame(&frame) {
                Ok(registration) => {
                    metrics::record_message("accepted");
                    if self
                        .events
                        .send(ChannelEvent::Message(id, registration))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Dropping invalid frame");
                    metrics::record_message(e.kind());
                }
            }
        }

        tracing::debug!(connection_id = %id, "Registration client disconnected");
        let _ = self.events.send(ChannelEvent::Disconnected(id)).await;
    }
}

/// Discard input up to and including the next newline.
/// Returns false on EOF.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            reader.consume(pos + 1);
            return Ok(true);
        }
        let len = buf.len();
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::protocol::ProxyTarget;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn frames_arrive_in_order_then_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.socket");
        let (tx, mut rx) = mpsc::channel(16);
        let mut listener = RegistrationListener::bind(&path, 1024, 8, tx).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        let id = listener.accept().await.unwrap();

        let payload = concat!(
            "{\"domain-name\":\"a.local\",\"http-port\":1}\n",
            "garbage\n",
            "\n",
            "{\"domain-name\":\"b.local\",\"https-port\":2}\n",
        );
        client.write_all(payload.as_bytes()).await.unwrap();
        drop(client);

        match rx.recv().await.unwrap() {
            ChannelEvent::Message(got, reg) => {
                assert_eq!(got, id);
                assert_eq!(reg.domain_name, "a.local");
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ChannelEvent::Message(_, reg) => assert_eq!(reg.target, ProxyTarget::Https(2)),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Disconnected(id));
    }

    #[tokio::test]
    async fn oversize_frame_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.socket");
        let (tx, mut rx) = mpsc::channel(16);
        let mut listener = RegistrationListener::bind(&path, 64, 8, tx).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        let id = listener.accept().await.unwrap();

        let mut payload = vec![b'x'; 500];
        payload.push(b'\n');
        payload.extend_from_slice(b"{\"domain-name\":\"a.local\",\"http-port\":1}\n");
        client.write_all(&payload).await.unwrap();
        drop(client);

        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Message(got, _) if got == id));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Disconnected(id));
    }

    #[tokio::test]
    async fn stale_socket_is_replaced_and_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/api.socket");
        let (tx, _rx) = mpsc::channel(16);

        let first = RegistrationListener::bind(&path, 1024, 8, tx.clone()).unwrap();
        drop(first);
        assert!(path.exists());

        let second = RegistrationListener::bind(&path, 1024, 8, tx).unwrap();
        assert_eq!(second.path(), path);
        second.close();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn full_queue_pauses_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.socket");
        let (tx, mut rx) = mpsc::channel(4);
        let mut listener = RegistrationListener::bind(&path, 1024, 8, tx).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        let id = listener.accept().await.unwrap();
        let mut payload = Vec::new();
        for port in 1..=100u16 {
            payload.extend_from_slice(
                format!("{{\"domain-name\":\"a.local\",\"http-port\":{}}}\n", port).as_bytes(),
            );
        }
        client.write_all(&payload).await.unwrap();
        drop(client);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 4);

        // nothing was lost while the reader waited
        let mut last_port = 4;
        loop {
            match rx.recv().await.unwrap() {
                ChannelEvent::Message(_, reg) => {
                    last_port += 1;
                    assert_eq!(reg.target, ProxyTarget::Http(last_port));
                }
                ChannelEvent::Disconnected(got) => {
                    assert_eq!(got, id);
                    break;
                }
            }
        }
        assert_eq!(last_port, 100);
    }

    #[tokio::test]
    async fn connection_limit_defers_accept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.socket");
        let (tx, mut rx) = mpsc::channel(16);
        let mut listener = RegistrationListener::bind(&path, 1024, 1, tx).unwrap();

        let first = UnixStream::connect(&path).await.unwrap();
        let first_id = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        let _second = UnixStream::connect(&path).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(waiting.is_err());

        drop(first);
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Disconnected(first_id));
        let second_id = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(second_id, first_id);
    }

    #[test]
    fn regular_file_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.socket");
        std::fs::write(&path, b"keep").unwrap();
        assert!(remove_stale_socket(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }
}
