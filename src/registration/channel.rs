//! Per-connection registration state.
//!
//! # Responsibilities
//! - Map each open connection to at most one stored fragment
//! - Turn the first valid message into `add`, later ones into `update`
//! - Remove a connection's fragment before its record is discarded
//! - Keep the advertised domain set in step with live registrations
//!
//! Handlers never wait on the discovery daemon: the front end is reconciled
//! first and the advertiser only sees the new desired set.

use std::collections::{HashMap, HashSet};

use crate::advertiser::AdvertiserHandle;
use crate::fragments::FragmentProducer;
use crate::frontend::{FrontEndSupervisor, SupervisorError};
use crate::observability::metrics;
use crate::registration::connection::{ClientState, ConnectionId, RegisteredClient};
use crate::registration::protocol::Registration;

/// Registration state for all open connections.
pub struct RegistrationChannel {
    clients: HashMap<ConnectionId, RegisteredClient>,
    producer: Box<dyn FragmentProducer>,
    /// Domains advertised for reasons other than a connection (static sites).
    pinned: HashSet<String>,
}

impl RegistrationChannel {
    pub fn new(producer: Box<dyn FragmentProducer>) -> Self {
        Self {
            clients: HashMap::new(),
            producer,
            pinned: HashSet::new(),
        }
    }

    /// Keep `domain` advertised even when no connection registers it.
    pub fn pin_domain(&mut self, domain: impl Into<String>) {
        self.pinned.insert(domain.into());
    }

    pub fn on_connect(&mut self, id: ConnectionId) {
        self.clients.insert(id, RegisteredClient::new(id));
        metrics::set_clients(self.clients.len());
    }

    pub fn client(&self, id: ConnectionId) -> Option<&RegisteredClient> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Apply a valid message from `id`.
    ///
    /// The connection counts as registered whenever its fragment made it into
    /// the store, even if reconciling the merged document then failed.
    pub fn handle_message(
        &mut self,
        id: ConnectionId,
        registration: Registration,
        frontend: &mut FrontEndSupervisor,
        advertiser: &AdvertiserHandle,
    ) -> Result<(), SupervisorError> {
        if !self.clients.contains_key(&id) {
            self.on_connect(id);
        }
        let fragment = self.producer.produce(&registration);
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        let fragment_id = client.fragment_id.clone();
        let previous = match &client.state {
            ClientState::Registered(previous) => Some(previous.domain_name.clone()),
            ClientState::Unregistered => None,
        };

        let result = match previous {
            None => frontend.add_config(&fragment_id, fragment),
            Some(_) => frontend.update_config(&fragment_id, fragment),
        };
        if !frontend.store().contains(&fragment_id) {
            return result;
        }

        match previous {
            None => {
                tracing::info!(
                    connection_id = %id,
                    domain = %registration.domain_name,
                    upstream = %registration.target.upstream_url(),
                    "Client registered"
                );
            }
            Some(previous) => {
                if previous != registration.domain_name && !self.domain_in_use(id, &previous) {
                    advertiser.remove_domain(&previous);
                }
                tracing::info!(
                    connection_id = %id,
                    domain = %registration.domain_name,
                    upstream = %registration.target.upstream_url(),
                    "Client registration updated"
                );
            }
        }
        advertiser.add_domain(&registration.domain_name);

        if let Some(client) = self.clients.get_mut(&id) {
            client.state = ClientState::Registered(registration);
        }
        result
    }

    /// Forget `id`, removing its fragment first if it has one.
    pub fn handle_disconnect(
        &mut self,
        id: ConnectionId,
        frontend: &mut FrontEndSupervisor,
        advertiser: &AdvertiserHandle,
    ) -> Result<(), SupervisorError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };

        let result = match client.active_fragment() {
            Some(fragment_id) => frontend.remove_config(fragment_id),
            None => Ok(()),
        };
        let domain = match self.clients.remove(&id).map(|c| c.state) {
            Some(ClientState::Registered(registration)) => Some(registration.domain_name),
            _ => None,
        };
        if let Some(domain) = domain {
            if !self.domain_in_use(id, &domain) {
                advertiser.remove_domain(&domain);
            }
            tracing::info!(connection_id = %id, domain = %domain, "Client unregistered");
        }
        metrics::set_clients(self.clients.len());
        result
    }

    /// Drop every connection, removing all client fragments in one batch.
    pub fn drain(&mut self, frontend: &mut FrontEndSupervisor) -> Result<(), SupervisorError> {
        let ids: Vec<String> = self
            .clients
            .values()
            .filter_map(|c| c.active_fragment().map(str::to_string))
            .collect();
        self.clients.clear();
        metrics::set_clients(0);
        if ids.is_empty() {
            return Ok(());
        }
        tracing::info!(fragments = ids.len(), "Removing client fragments");
        frontend.remove_batch(ids)
    }

    /// True if a pinned entry or a connection other than `owner` uses `domain`.
    fn domain_in_use(&self, owner: ConnectionId, domain: &str) -> bool {
        self.pinned.contains(domain)
            || self.clients.values().any(|c| {
                c.connection_id != owner
                    && matches!(&c.state, ClientState::Registered(r) if r.domain_name == domain)
            })
    }
}
