//! Metrics collection and exposition.
//!
//! # Metrics
//! - `registrar_reloads_total` (counter): reload requests sent to the front end
//! - `registrar_reconcile_failures_total` (counter): documents that could not be rendered
//! - `registrar_fragments` (gauge): fragments currently stored
//! - `registrar_clients` (gauge): open registration connections
//! - `registrar_messages_total` (counter): frames by outcome
//! - `registrar_advertiser_state` (gauge): 0=no server, 1=connected, 2=registered, 3=fatal

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_reload() {
    counter!("registrar_reloads_total").increment(1);
}

pub fn record_reconcile_failure() {
    counter!("registrar_reconcile_failures_total").increment(1);
}

pub fn set_fragments(count: usize) {
    gauge!("registrar_fragments").set(count as f64);
}

pub fn set_clients(count: usize) {
    gauge!("registrar_clients").set(count as f64);
}

/// `outcome` is `accepted` or a validation error kind.
pub fn record_message(outcome: &'static str) {
    counter!("registrar_messages_total", "outcome" => outcome).increment(1);
}

pub fn set_advertiser_state(code: u8) {
    gauge!("registrar_advertiser_state").set(f64::from(code));
}
