//! Front-end supervisor.
//!
//! # Responsibilities
//! - Own the fragment store and reconcile after every mutation
//! - Write the generated document atomically
//! - Bring the front end up and wait for it to listen
//! - Stop it with a bounded grace period and clean its virtual root

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::{FrontEndConfig, PathsConfig};
use crate::fragments::{ConfigFragment, ConfigStore};
use crate::frontend::process::{FrontEndProcess, ProcessState};
use crate::frontend::readiness::wait_for_listener;
use crate::frontend::render::{render_document, DocumentLayout};
use crate::frontend::SupervisorError;
use crate::observability::metrics;

/// A started front-end process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEndHandle {
    pub config_path: PathBuf,
    pub pid: u32,
    pub probe_addr: SocketAddr,
}

/// Owns the fragment store and the front-end process.
pub struct FrontEndSupervisor {
    store: ConfigStore,
    layout: DocumentLayout,
    config_path: PathBuf,
    root_dir: PathBuf,
    log_dir: PathBuf,
    frontend: FrontEndConfig,
    process: Box<dyn FrontEndProcess>,
    handle: Option<FrontEndHandle>,
    /// Cleared when the process is seen to exit on its own.
    alive: bool,
}

impl FrontEndSupervisor {
    pub fn new(
        paths: &PathsConfig,
        frontend: &FrontEndConfig,
        process: Box<dyn FrontEndProcess>,
    ) -> Self {
        Self {
            store: ConfigStore::new(),
            layout: DocumentLayout::new(paths, frontend),
            config_path: paths.frontend_config(),
            root_dir: paths.frontend_root(),
            log_dir: paths.log_dir.clone(),
            frontend: frontend.clone(),
            process,
            handle: None,
            alive: false,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn handle(&self) -> Option<&FrontEndHandle> {
        self.handle.as_ref()
    }

    /// True while a started process has not been seen to exit.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.alive
    }

    pub fn add_config(
        &mut self,
        id: &str,
        fragment: ConfigFragment,
    ) -> Result<(), SupervisorError> {
        self.store.add(id, fragment)?;
        tracing::debug!(fragment_id = %id, "Fragment added");
        self.reconfigure()
    }

    pub fn update_config(
        &mut self,
        id: &str,
        fragment: ConfigFragment,
    ) -> Result<(), SupervisorError> {
        self.store.update(id, fragment)?;
        tracing::debug!(fragment_id = %id, "Fragment updated");
        self.reconfigure()
    }

    pub fn remove_config(&mut self, id: &str) -> Result<(), SupervisorError> {
        self.store.remove(id)?;
        tracing::debug!(fragment_id = %id, "Fragment removed");
        self.reconfigure()
    }

    /// Remove several fragments with a single reconfigure.
    ///
    /// Ids that exist are removed even if others are missing; the missing
    /// ones are reported after reconciling.
    pub fn remove_batch<I, S>(&mut self, ids: I) -> Result<(), SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.store.len();
        let result = self.store.remove_batch(ids);
        if self.store.len() != before {
            tracing::debug!(removed = before - self.store.len(), "Fragments removed");
            self.reconfigure()?;
        }
        result.map(|_| ()).map_err(SupervisorError::from)
    }

    /// Render the document for the current store contents.
    pub fn render(&self) -> Result<String, SupervisorError> {
        let merged = self.store.merge()?;
        Ok(render_document(&self.layout, &merged)?)
    }

    /// Rewrite the document and ask a running front end to reload it.
    ///
    /// Does nothing before `start()` or after `stop()`. On a dependency
    /// conflict the previous document stays in place.
    pub fn reconfigure(&mut self) -> Result<(), SupervisorError> {
        metrics::set_fragments(self.store.len());
        if self.handle.is_none() {
            return Ok(());
        }

        let document = match self.render() {
            Ok(document) => document,
            Err(e) => {
                metrics::record_reconcile_failure();
                return Err(e);
            }
        };
        write_atomic(&self.config_path, &document)?;

        if !self.alive {
            tracing::warn!(
                path = %self.config_path.display(),
                "Front end is not running, config written without reload"
            );
            return Ok(());
        }
        self.process.reload()?;
        metrics::record_reload();
        tracing::info!(fragments = self.store.len(), "Front end reloaded");
        Ok(())
    }

    /// Write the first document, spawn the front end and wait until it listens.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.handle.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        let probe_addr = self
            .frontend
            .probe_addr()
            .ok_or_else(|| SupervisorError::InvalidListenAddress(self.frontend.listen_ip.clone()))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.log_dir)?;

        let document = self.render()?;
        write_atomic(&self.config_path, &document)?;

        let pid = self.process.spawn(&self.config_path)?;
        tracing::info!(pid, binary = %self.frontend.binary.display(), "Front end spawned");

        let ready = wait_for_listener(
            self.process.as_mut(),
            probe_addr,
            self.frontend.probe_interval(),
            self.frontend.startup_timeout(),
        )
        .await;
        if let Err(e) = ready {
            if let Err(stop_err) = self.process.terminate(self.frontend.stop_grace()).await {
                tracing::warn!(error = %stop_err, "Failed to stop front end after startup failure");
            }
            return Err(e);
        }

        self.handle = Some(FrontEndHandle {
            config_path: self.config_path.clone(),
            pid,
            probe_addr,
        });
        self.alive = true;
        metrics::set_fragments(self.store.len());
        tracing::info!(pid, address = %probe_addr, "Front end listening");
        Ok(())
    }

    /// Check for an unexpected exit. Returns the exit state the first time
    /// it is observed; the process is not restarted.
    pub fn poll_exit(&mut self) -> Option<ProcessState> {
        if !self.is_running() {
            return None;
        }
        match self.process.state() {
            Ok(ProcessState::Running) => None,
            Ok(exited) => {
                self.alive = false;
                tracing::error!(
                    state = ?exited,
                    "Front end exited unexpectedly; it will not be restarted"
                );
                Some(exited)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query front end state");
                None
            }
        }
    }

    /// Terminate the front end and remove its virtual root.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        let result = match self.handle.take() {
            Some(handle) => {
                tracing::info!(pid = handle.pid, "Stopping front end");
                self.process.terminate(self.frontend.stop_grace()).await
            }
            None => Ok(()),
        };
        self.alive = false;
        remove_dir_if_present(&self.root_dir)?;
        result
    }
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::ModuleDeps;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Calls {
        reloads: Arc<AtomicUsize>,
        terminations: Arc<AtomicUsize>,
        state: Arc<Mutex<Option<ProcessState>>>,
    }

    struct FakeProcess {
        calls: Calls,
        exit_on_spawn: Option<i32>,
    }

    #[async_trait]
    impl FrontEndProcess for FakeProcess {
        fn spawn(&mut self, _config_path: &Path) -> Result<u32, SupervisorError> {
            let state = match self.exit_on_spawn {
                Some(code) => ProcessState::Exited(Some(code)),
                None => ProcessState::Running,
            };
            *self.calls.state.lock().unwrap() = Some(state);
            Ok(4242)
        }

        fn state(&mut self) -> Result<ProcessState, SupervisorError> {
            self.calls.state.lock().unwrap().ok_or(SupervisorError::NotRunning)
        }

        fn reload(&mut self) -> Result<(), SupervisorError> {
            self.calls.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<(), SupervisorError> {
            self.calls.terminations.fetch_add(1, Ordering::SeqCst);
            *self.calls.state.lock().unwrap() = None;
            Ok(())
        }
    }

    fn settings(dir: &Path, port: u16) -> (PathsConfig, FrontEndConfig) {
        let paths = PathsConfig {
            run_dir: dir.join("run"),
            tmp_dir: dir.join("tmp"),
            log_dir: dir.join("log"),
            socket_path: dir.join("run/api.socket"),
            pid_file: dir.join("run/registrar.pid"),
        };
        let frontend = FrontEndConfig {
            listen_ip: "127.0.0.1".into(),
            http_port: port,
            probe_interval_ms: 20,
            startup_timeout_ms: 300,
            ..FrontEndConfig::default()
        };
        (paths, frontend)
    }

    fn supervisor(
        dir: &Path,
        port: u16,
        exit_on_spawn: Option<i32>,
    ) -> (FrontEndSupervisor, Calls) {
        let (paths, frontend) = settings(dir, port);
        let calls = Calls::default();
        let process = FakeProcess {
            calls: calls.clone(),
            exit_on_spawn,
        };
        (FrontEndSupervisor::new(&paths, &frontend, Box::new(process)), calls)
    }

    fn fragment(name: &str) -> ConfigFragment {
        ConfigFragment::new(
            format!("<VirtualHost *:80>\n    ServerName {}\n</VirtualHost>\n", name),
            ModuleDeps::new().with("proxy_module", "mod_proxy.so"),
        )
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn mutations_before_start_do_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, calls) = supervisor(dir.path(), 80, None);

        sup.add_config("a", fragment("a.local")).unwrap();
        sup.update_config("a", fragment("b.local")).unwrap();

        assert!(!sup.config_path().exists());
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(sup.store().len(), 1);
    }

    #[tokio::test]
    async fn start_then_each_mutation_reloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut sup, calls) = supervisor(dir.path(), port, None);

        sup.start().await.unwrap();
        assert!(sup.is_running());
        assert_eq!(sup.handle().unwrap().pid, 4242);
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 0);

        sup.add_config("a", fragment("a.local")).unwrap();
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 1);
        let text = fs::read_to_string(sup.config_path()).unwrap();
        assert!(text.contains("ServerName a.local"));

        sup.remove_config("a").unwrap();
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 2);
        let text = fs::read_to_string(sup.config_path()).unwrap();
        assert!(!text.contains("ServerName a.local"));
    }

    #[tokio::test]
    async fn reconfigure_is_byte_identical_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut sup, _calls) = supervisor(dir.path(), port, None);
        sup.add_config("a", fragment("a.local")).unwrap();
        sup.start().await.unwrap();

        sup.reconfigure().unwrap();
        let first = fs::read(sup.config_path()).unwrap();
        sup.reconfigure().unwrap();
        let second = fs::read(sup.config_path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(sup.render().unwrap().into_bytes(), second);
    }

    #[tokio::test]
    async fn startup_fails_when_process_exits_first() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port().await;
        let (mut sup, calls) = supervisor(dir.path(), port, Some(1));

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartupFailed { code: Some(1) }));
        assert!(sup.handle().is_none());
        assert_eq!(calls.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn startup_times_out_while_process_alive() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port().await;
        let (mut sup, calls) = supervisor(dir.path(), port, None);

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout(_)));
        assert!(sup.handle().is_none());
        assert_eq!(calls.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dependency_conflict_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut sup, calls) = supervisor(dir.path(), port, None);
        sup.start().await.unwrap();
        sup.add_config("a", fragment("a.local")).unwrap();
        let before = fs::read(sup.config_path()).unwrap();

        let conflicting = ConfigFragment::new(
            "<VirtualHost *:80>\n</VirtualHost>\n",
            ModuleDeps::new().with("proxy_module", "mod_proxy_fork.so"),
        );
        let err = sup.add_config("b", conflicting).unwrap_err();
        assert!(err.is_dependency_conflict());
        assert_eq!(fs::read(sup.config_path()).unwrap(), before);
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 1);

        sup.remove_config("b").unwrap();
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn crashed_front_end_is_reported_once_and_not_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut sup, calls) = supervisor(dir.path(), port, None);
        sup.start().await.unwrap();

        *calls.state.lock().unwrap() = Some(ProcessState::Exited(None));
        assert_eq!(sup.poll_exit(), Some(ProcessState::Exited(None)));
        assert_eq!(sup.poll_exit(), None);
        assert!(!sup.is_running());

        sup.add_config("a", fragment("a.local")).unwrap();
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 0);
        assert!(fs::read_to_string(sup.config_path()).unwrap().contains("a.local"));
    }

    #[tokio::test]
    async fn stop_removes_virtual_root_and_batch_removes_once() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut sup, calls) = supervisor(dir.path(), port, None);
        sup.start().await.unwrap();
        sup.add_config("a", fragment("a.local")).unwrap();
        sup.add_config("b", fragment("b.local")).unwrap();
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 2);

        let err = sup.remove_batch(["a", "zz", "b"]).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Store(crate::fragments::StoreError::NotFoundBatch(_))
        ));
        assert_eq!(calls.reloads.load(Ordering::SeqCst), 3);
        assert!(sup.store().is_empty());

        let root = dir.path().join("tmp/httpd.root");
        assert!(root.exists());
        sup.stop().await.unwrap();
        assert!(!root.exists());
        assert_eq!(calls.terminations.load(Ordering::SeqCst), 1);
        assert!(sup.handle().is_none());
    }
}
