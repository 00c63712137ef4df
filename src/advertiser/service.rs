//! Advertiser task.
//!
//! Runs [`DomainAdvertiser`] off the registration loop. The loop publishes
//! the desired domain set through a `watch` channel and the task applies the
//! latest one, so a slow or hung daemon only delays advertisement.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::advertiser::{AdvertiserEvent, AdvertiserState, DomainAdvertiser};

/// Owner side of the advertiser task.
pub struct AdvertiserHandle {
    desired: watch::Sender<BTreeSet<String>>,
    state: watch::Receiver<AdvertiserState>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AdvertiserHandle {
    /// Start the advertiser task. Must be called within a Tokio runtime.
    ///
    /// `events` carries what the daemon adapter and bus watcher report.
    pub fn spawn(advertiser: DomainAdvertiser, events: UnboundedReceiver<AdvertiserEvent>) -> Self {
        let (desired, desired_rx) = watch::channel(BTreeSet::new());
        let (state_tx, state) = watch::channel(advertiser.state());
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(drive(advertiser, events, desired_rx, state_tx, stop_rx));

        Self {
            desired,
            state,
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub fn add_domain(&self, name: &str) {
        self.desired
            .send_if_modified(|set| set.insert(name.to_string()));
    }

    pub fn remove_domain(&self, name: &str) {
        self.desired.send_if_modified(|set| set.remove(name));
    }

    /// Desired domain names, sorted.
    pub fn domains(&self) -> Vec<String> {
        self.desired.borrow().iter().cloned().collect()
    }

    /// Last state the task reported.
    pub fn state(&self) -> AdvertiserState {
        *self.state.borrow()
    }

    /// Withdraw all records and end the task, abandoning it after `grace`.
    pub async fn stop(&mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Advertiser task ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Advertiser did not stop in time, abandoning it"
                );
                task.abort();
            }
        }
    }
}

impl Drop for AdvertiserHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drive(
    mut advertiser: DomainAdvertiser,
    mut events: UnboundedReceiver<AdvertiserEvent>,
    mut desired: watch::Receiver<BTreeSet<String>>,
    state: watch::Sender<AdvertiserState>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let retry = retry_timer(advertiser.next_retry());

        tokio::select! {
            _ = &mut stop => break,
            changed = desired.changed() => {
                if changed.is_err() {
                    break;
                }
                let domains = desired.borrow_and_update().clone();
                advertiser.set_domains(domains).await;
            }
            Some(event) = events.recv() => advertiser.handle(event).await,
            _ = retry => advertiser.handle(AdvertiserEvent::RetryElapsed).await,
        }
        state.send_replace(advertiser.state());
    }

    advertiser.stop().await;
    state.send_replace(advertiser.state());
}

/// Sleep until `deadline`, or forever if there is none.
async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
