//! Domain advertiser state machine.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::advertiser::daemon::{AliasRecord, DiscoveryDaemon};
use crate::advertiser::encoding::encode_rdata;
use crate::advertiser::{
    AdvertiseError, AdvertiserEvent, EntryGroupState, ServerState, RECORD_TTL_SECS,
};
use crate::observability::metrics;
use crate::registration::protocol::normalize_domain;

/// Limit on a single daemon call unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Advertiser lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    /// No discovery daemon on the bus.
    NoServer,
    /// Server handle held, desired set not committed.
    ServerConnected,
    /// Entry group committed with the current desired set.
    Registered,
    /// The daemon reported a permanent entry group failure.
    Fatal,
}

impl AdvertiserState {
    fn code(self) -> u8 {
        match self {
            AdvertiserState::NoServer => 0,
            AdvertiserState::ServerConnected => 1,
            AdvertiserState::Registered => 2,
            AdvertiserState::Fatal => 3,
        }
    }
}

/// Keeps the desired domain set published through a discovery daemon.
pub struct DomainAdvertiser {
    daemon: Box<dyn DiscoveryDaemon>,
    state: AdvertiserState,
    desired: BTreeSet<String>,
    retry_interval: Duration,
    retry_at: Option<Instant>,
    call_timeout: Duration,
}

impl DomainAdvertiser {
    pub fn new(daemon: Box<dyn DiscoveryDaemon>, retry_interval: Duration) -> Self {
        metrics::set_advertiser_state(AdvertiserState::NoServer.code());
        Self {
            daemon,
            state: AdvertiserState::NoServer,
            desired: BTreeSet::new(),
            retry_interval,
            retry_at: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Fail any daemon call that takes longer than `limit`.
    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = limit;
        self
    }

    pub fn state(&self) -> AdvertiserState {
        self.state
    }

    /// Desired domain names, sorted.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.desired.iter().map(String::as_str)
    }

    /// When the pending retry is due, if one is scheduled.
    pub fn next_retry(&self) -> Option<Instant> {
        self.retry_at
    }

    pub async fn add_domain(&mut self, name: &str) {
        if self.desired.insert(name.to_string()) {
            tracing::debug!(domain = %name, "Domain added to advertisement set");
            self.rebuild_if_registered().await;
        }
    }

    pub async fn remove_domain(&mut self, name: &str) {
        if self.desired.remove(name) {
            tracing::debug!(domain = %name, "Domain removed from advertisement set");
            self.rebuild_if_registered().await;
        }
    }

    /// Replace the whole desired set, rebuilding once if it changed.
    pub async fn set_domains(&mut self, domains: BTreeSet<String>) {
        if self.desired != domains {
            tracing::debug!(domains = domains.len(), "Advertisement set replaced");
            self.desired = domains;
            self.rebuild_if_registered().await;
        }
    }

    /// Feed one event into the state machine.
    pub async fn handle(&mut self, event: AdvertiserEvent) {
        if self.state == AdvertiserState::Fatal {
            tracing::trace!(?event, "Advertiser disabled, ignoring event");
            return;
        }
        tracing::debug!(?event, state = ?self.state, "Advertiser event");

        match event {
            AdvertiserEvent::DaemonAppeared => {
                if self.state == AdvertiserState::NoServer {
                    self.retry_at = None;
                    self.connect().await;
                }
            }
            AdvertiserEvent::DaemonDisappeared => {
                self.unregister().await;
                self.daemon.release();
                self.set_state(AdvertiserState::NoServer);
            }
            AdvertiserEvent::ServerStateChanged(ServerState::Running) => match self.state {
                AdvertiserState::ServerConnected => {
                    self.retry_at = None;
                    self.register().await;
                }
                AdvertiserState::Registered => self.rebuild().await,
                _ => {}
            },
            AdvertiserEvent::ServerStateChanged(other) => {
                if self.state == AdvertiserState::Registered {
                    tracing::info!(server_state = ?other, "Discovery daemon left running state");
                    self.unregister().await;
                    self.set_state(AdvertiserState::ServerConnected);
                }
            }
            AdvertiserEvent::EntryGroupStateChanged(EntryGroupState::Collision) => {
                if self.state == AdvertiserState::Registered {
                    tracing::warn!(
                        retry_secs = self.retry_interval.as_secs(),
                        "Domain name collision, retrying later"
                    );
                    self.unregister().await;
                    self.set_state(AdvertiserState::ServerConnected);
                    self.schedule_retry();
                }
            }
            AdvertiserEvent::EntryGroupStateChanged(EntryGroupState::Failure) => {
                if self.state != AdvertiserState::NoServer {
                    self.enter_fatal();
                }
            }
            AdvertiserEvent::EntryGroupStateChanged(_) => {}
            AdvertiserEvent::RetryElapsed => {
                self.retry_at = None;
                match self.state {
                    AdvertiserState::NoServer => self.connect().await,
                    AdvertiserState::ServerConnected => self.register().await,
                    _ => {}
                }
            }
        }
    }

    /// Withdraw everything and drop the server handle.
    pub async fn stop(&mut self) {
        if self.state == AdvertiserState::Fatal {
            return;
        }
        self.unregister().await;
        self.daemon.release();
        self.set_state(AdvertiserState::NoServer);
        tracing::info!("Advertiser stopped");
    }

    async fn connect(&mut self) {
        match bounded(self.call_timeout, "connect", self.daemon.connect()).await {
            Ok(server_state) => {
                self.set_state(AdvertiserState::ServerConnected);
                if server_state == ServerState::Running {
                    self.register().await;
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    retry_secs = self.retry_interval.as_secs(),
                    "Failed to connect to discovery daemon, retrying later"
                );
                self.daemon.release();
                self.schedule_retry();
            }
        }
    }

    async fn register(&mut self) {
        let records = match self.build_records().await {
            Ok(records) => records,
            Err(e) => return self.registration_failed(e).await,
        };

        if records.is_empty() {
            self.set_state(AdvertiserState::Registered);
            return;
        }

        let commit = self.daemon.commit_group(&records);
        match bounded(self.call_timeout, "commit_group", commit).await {
            Ok(()) => {
                tracing::info!(domains = records.len(), "Domain names registered");
                self.set_state(AdvertiserState::Registered);
            }
            Err(e) => self.registration_failed(e).await,
        }
    }

    async fn registration_failed(&mut self, error: AdvertiseError) {
        tracing::error!(
            error = %error,
            retry_secs = self.retry_interval.as_secs(),
            "Failed to register domain names, retrying later"
        );
        self.reset_group().await;
        self.schedule_retry();
    }

    async fn build_records(&mut self) -> Result<Vec<AliasRecord>, AdvertiseError> {
        let host = bounded(self.call_timeout, "host_fqdn", self.daemon.host_fqdn()).await?;
        let rdata = encode_rdata(&host)?;
        let mut records = Vec::with_capacity(self.desired.len());
        for domain in &self.desired {
            match normalize_domain(domain) {
                Ok(name) => records.push(AliasRecord {
                    name,
                    rdata: rdata.clone(),
                    ttl: RECORD_TTL_SECS,
                }),
                Err(e) => tracing::warn!(domain = %domain, error = %e, "Skipping domain"),
            }
        }
        Ok(records)
    }

    async fn unregister(&mut self) {
        self.retry_at = None;
        self.reset_group().await;
    }

    async fn reset_group(&mut self) {
        let reset = self.daemon.reset_group();
        if let Err(e) = bounded(self.call_timeout, "reset_group", reset).await {
            tracing::debug!(error = %e, "Entry group reset failed");
        }
    }

    async fn rebuild(&mut self) {
        self.unregister().await;
        self.set_state(AdvertiserState::ServerConnected);
        self.register().await;
    }

    async fn rebuild_if_registered(&mut self) {
        if self.state == AdvertiserState::Registered {
            self.rebuild().await;
        }
    }

    fn enter_fatal(&mut self) {
        tracing::error!("Entry group failed permanently, domain advertisement disabled");
        self.retry_at = None;
        self.daemon.release();
        self.set_state(AdvertiserState::Fatal);
    }

    fn schedule_retry(&mut self) {
        self.retry_at = Some(Instant::now() + self.retry_interval);
    }

    fn set_state(&mut self, state: AdvertiserState) {
        if self.state != state {
            tracing::info!(from = ?self.state, to = ?state, "Advertiser state changed");
            self.state = state;
            metrics::set_advertiser_state(state.code());
        }
    }
}

/// Run one daemon call, failing it once `limit` passes.
async fn bounded<T>(
    limit: Duration,
    call: &'static str,
    fut: impl Future<Output = Result<T, AdvertiseError>>,
) -> Result<T, AdvertiseError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdvertiseError::Timeout(call)),
    }
}
