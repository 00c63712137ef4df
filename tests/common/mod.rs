//! Shared fakes and helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};

use vhost_registrar::advertiser::{
    AdvertiseError, AdvertiserEvent, AliasRecord, DiscoveryDaemon, ServerState,
};
use vhost_registrar::config::{DaemonConfig, PathsConfig};
use vhost_registrar::frontend::{FrontEndProcess, ProcessState, SupervisorError};
use vhost_registrar::Orchestrator;

/// What the fake front end has been asked to do.
#[derive(Clone, Default)]
pub struct ProcessCalls {
    pub reloads: Arc<AtomicUsize>,
    pub terminations: Arc<AtomicUsize>,
    pub exited: Arc<Mutex<Option<Option<i32>>>>,
}

impl ProcessCalls {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Make the fake process look like it crashed.
    pub fn crash(&self, code: Option<i32>) {
        *self.exited.lock().unwrap() = Some(code);
    }
}

/// Front end that never runs anything; the test owns the listening socket.
pub struct FakeProcess {
    pub calls: ProcessCalls,
}

#[async_trait]
impl FrontEndProcess for FakeProcess {
    fn spawn(&mut self, _config_path: &Path) -> Result<u32, SupervisorError> {
        Ok(4242)
    }

    fn state(&mut self) -> Result<ProcessState, SupervisorError> {
        Ok(match *self.calls.exited.lock().unwrap() {
            Some(code) => ProcessState::Exited(code),
            None => ProcessState::Running,
        })
    }

    fn reload(&mut self) -> Result<(), SupervisorError> {
        self.calls.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), SupervisorError> {
        self.calls.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Discovery daemon that records the committed alias names.
#[derive(Clone, Default)]
pub struct FakeDaemon {
    pub committed: Arc<Mutex<Option<Vec<String>>>>,
    pub commits: Arc<AtomicUsize>,
}

impl FakeDaemon {
    pub fn committed(&self) -> Option<Vec<String>> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoveryDaemon for FakeDaemon {
    async fn connect(&mut self) -> Result<ServerState, AdvertiseError> {
        Ok(ServerState::Running)
    }

    async fn host_fqdn(&mut self) -> Result<String, AdvertiseError> {
        Ok("testhost.local".into())
    }

    async fn commit_group(&mut self, records: &[AliasRecord]) -> Result<(), AdvertiseError> {
        *self.committed.lock().unwrap() = Some(records.iter().map(|r| r.name.clone()).collect());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_group(&mut self) -> Result<(), AdvertiseError> {
        *self.committed.lock().unwrap() = None;
        Ok(())
    }

    fn release(&mut self) {}
}

/// Discovery daemon that accepts the connection and then never answers.
pub struct HungDaemon;

#[async_trait]
impl DiscoveryDaemon for HungDaemon {
    async fn connect(&mut self) -> Result<ServerState, AdvertiseError> {
        Ok(ServerState::Running)
    }

    async fn host_fqdn(&mut self) -> Result<String, AdvertiseError> {
        std::future::pending().await
    }

    async fn commit_group(&mut self, _records: &[AliasRecord]) -> Result<(), AdvertiseError> {
        std::future::pending().await
    }

    async fn reset_group(&mut self) -> Result<(), AdvertiseError> {
        std::future::pending().await
    }

    fn release(&mut self) {}
}

/// Config rooted in `dir`, with the front end "listening" on `port`.
pub fn test_config(dir: &Path, port: u16) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.paths = PathsConfig {
        run_dir: dir.join("run"),
        tmp_dir: dir.join("tmp"),
        log_dir: dir.join("log"),
        socket_path: dir.join("run/api.socket"),
        pid_file: dir.join("run/vhost-registrar.pid"),
    };
    config.frontend.listen_ip = "127.0.0.1".into();
    config.frontend.http_port = port;
    config.frontend.probe_interval_ms = 10;
    config.frontend.startup_timeout_ms = 1000;
    config
}

/// A bound port standing in for the front end's listener.
pub fn front_end_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub process: ProcessCalls,
    pub daemon: FakeDaemon,
    pub advertiser_tx: UnboundedSender<AdvertiserEvent>,
}

pub fn harness(config: DaemonConfig) -> Harness {
    let daemon = FakeDaemon::default();
    harness_with_daemon(config, daemon.clone(), Box::new(daemon))
}

/// Harness whose advertiser talks to `backend`; `daemon` is only kept for
/// inspection.
pub fn harness_with_daemon(
    config: DaemonConfig,
    daemon: FakeDaemon,
    backend: Box<dyn DiscoveryDaemon>,
) -> Harness {
    let process = ProcessCalls::default();
    let (advertiser_tx, advertiser_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        config,
        Box::new(FakeProcess {
            calls: process.clone(),
        }),
        backend,
        advertiser_rx,
    );
    Harness {
        orchestrator,
        process,
        daemon,
        advertiser_tx,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Run `fut` with a five second limit.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
