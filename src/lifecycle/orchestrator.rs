//! Daemon orchestration: startup order, the event loop and shutdown order.

use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::time::MissedTickBehavior;

use crate::advertiser::{AdvertiserEvent, AdvertiserHandle, DiscoveryDaemon, DomainAdvertiser};
use crate::config::DaemonConfig;
use crate::fragments::ReverseProxyProducer;
use crate::frontend::{FrontEndProcess, FrontEndSupervisor, SupervisorError};
use crate::lifecycle::DaemonError;
use crate::registration::{ChannelEvent, RegistrationChannel, RegistrationListener};
use crate::sites::{build_site, SiteBackend};

const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed accept, doubled per consecutive failure up to the cap.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(2);

/// Owns every subsystem and drives them from one loop.
pub struct Orchestrator {
    config: DaemonConfig,
    supervisor: FrontEndSupervisor,
    advertiser: AdvertiserHandle,
    channel: RegistrationChannel,
    channel_tx: Sender<ChannelEvent>,
    channel_rx: Receiver<ChannelEvent>,
    listener: Option<RegistrationListener>,
    sites: Vec<Box<dyn SiteBackend>>,
}

impl Orchestrator {
    /// Must be called within a Tokio runtime; the advertiser task starts here.
    ///
    /// `advertiser_events` receives what the daemon adapter and bus watcher report.
    pub fn new(
        config: DaemonConfig,
        process: Box<dyn FrontEndProcess>,
        daemon: Box<dyn DiscoveryDaemon>,
        advertiser_events: UnboundedReceiver<AdvertiserEvent>,
    ) -> Self {
        let supervisor = FrontEndSupervisor::new(&config.paths, &config.frontend, process);
        let advertiser = DomainAdvertiser::new(daemon, config.advertiser.retry_interval())
            .with_call_timeout(config.advertiser.call_timeout());
        let advertiser = AdvertiserHandle::spawn(advertiser, advertiser_events);
        let channel = RegistrationChannel::new(Box::new(ReverseProxyProducer::new(
            config.frontend.http_port,
        )));
        let (channel_tx, channel_rx) = mpsc::channel(config.registration.queue_depth);

        Self {
            config,
            supervisor,
            advertiser,
            channel,
            channel_tx,
            channel_rx,
            listener: None,
            sites: Vec::new(),
        }
    }

    pub fn supervisor(&self) -> &FrontEndSupervisor {
        &self.supervisor
    }

    pub fn advertiser(&self) -> &AdvertiserHandle {
        &self.advertiser
    }

    pub fn channel(&self) -> &RegistrationChannel {
        &self.channel
    }

    /// Bring everything up. On failure, whatever started is torn down again.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        if let Err(e) = self.bring_up().await {
            tracing::error!(error = %e, "Startup failed");
            self.shutdown().await;
            return Err(e);
        }
        tracing::info!(
            socket = %self.config.paths.socket_path.display(),
            sites = self.sites.len(),
            "Daemon started"
        );
        Ok(())
    }

    async fn bring_up(&mut self) -> Result<(), DaemonError> {
        write_pid_file(&self.config.paths.pid_file)?;

        for site_config in &self.config.sites {
            let mut site =
                build_site(site_config, &self.config.paths, self.config.frontend.http_port)?;
            let fragment = match site.start() {
                Ok(fragment) => fragment,
                Err(e) => {
                    if let Err(cleanup) = site.stop() {
                        tracing::warn!(
                            site = %site.id(),
                            error = %cleanup,
                            "Failed to clean up site"
                        );
                    }
                    return Err(e.into());
                }
            };
            let domain = site.domain_name().to_string();
            let fragment_id = site.fragment_id();
            self.sites.push(site);

            self.supervisor.add_config(&fragment_id, fragment)?;
            self.channel.pin_domain(domain.clone());
            self.advertiser.add_domain(&domain);
        }

        self.supervisor.start().await?;

        self.listener = Some(RegistrationListener::bind(
            &self.config.paths.socket_path,
            self.config.registration.max_frame_bytes,
            self.config.registration.max_connections,
            self.channel_tx.clone(),
        )?);
        Ok(())
    }

    /// Run until `shutdown` fires. Does not tear anything down.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let Self {
            supervisor,
            advertiser,
            channel,
            channel_rx,
            listener,
            ..
        } = self;
        let listener = listener.as_mut().ok_or(DaemonError::NotStarted)?;

        let mut exit_poll = tokio::time::interval(EXIT_POLL_INTERVAL);
        exit_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut accept_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Event loop stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(id) => {
                        accept_failures = 0;
                        channel.on_connect(id);
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let pause = accept_backoff(accept_failures);
                        tracing::warn!(
                            error = %e,
                            failures = accept_failures,
                            pause_ms = pause.as_millis() as u64,
                            "Accept failed"
                        );
                        tokio::time::sleep(pause).await;
                    }
                },
                Some(event) = channel_rx.recv() => {
                    let result = match event {
                        ChannelEvent::Message(id, registration) => {
                            channel.handle_message(id, registration, supervisor, advertiser)
                        }
                        ChannelEvent::Disconnected(id) => {
                            channel.handle_disconnect(id, supervisor, advertiser)
                        }
                    };
                    if let Err(e) = result {
                        report_reconcile_error(&e);
                    }
                }
                _ = exit_poll.tick() => {
                    supervisor.poll_exit();
                }
            }
        }
        Ok(())
    }

    /// Ordered teardown. Safe to call after a partial start.
    pub async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close();
        }

        if let Err(e) = self.channel.drain(&mut self.supervisor) {
            report_reconcile_error(&e);
        }

        if let Err(e) = self.supervisor.stop().await {
            tracing::warn!(error = %e, "Front end did not stop cleanly");
        }

        // one call may be in flight and the withdrawal needs another
        let grace = self.config.advertiser.call_timeout() * 2;
        self.advertiser.stop(grace).await;

        for mut site in self.sites.drain(..) {
            if let Err(e) = site.stop() {
                tracing::warn!(site = %site.id(), error = %e, "Failed to clean up site");
            }
        }

        remove_pid_file(&self.config.paths.pid_file);
        tracing::info!("Shutdown complete");
    }
}

fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(8);
    (ACCEPT_BACKOFF * (1u32 << doublings)).min(MAX_ACCEPT_BACKOFF)
}

fn report_reconcile_error(error: &SupervisorError) {
    if error.is_dependency_conflict() {
        tracing::error!(
            error = %error,
            "Conflicting module dependencies, previous front-end configuration kept"
        );
    } else {
        tracing::error!(error = %error, "Failed to reconcile front-end configuration");
    }
}

fn write_pid_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove pid file");
        }
    }
}
