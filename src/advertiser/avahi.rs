//! Avahi adapter over the system D-Bus.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use zbus::fdo::DBusProxy;
use zbus::names::BusName;
use zbus::proxy::CacheProperties;
use zbus::Connection;

use crate::advertiser::daemon::{AliasRecord, DiscoveryDaemon};
use crate::advertiser::{AdvertiseError, AdvertiserEvent, EntryGroupState, ServerState};

/// Well-known bus name of the Avahi daemon.
pub const AVAHI_SERVICE: &str = "org.freedesktop.Avahi";

const IF_UNSPEC: i32 = -1;
const PROTO_INET: i32 = 0;
const CLASS_IN: u16 = 0x01;
const TYPE_CNAME: u16 = 0x05;

mod server {
    #[zbus::proxy(
        interface = "org.freedesktop.Avahi.Server",
        default_service = "org.freedesktop.Avahi",
        default_path = "/",
        gen_blocking = false
    )]
    pub trait AvahiServer {
        fn get_state(&self) -> zbus::Result<i32>;

        fn get_host_name_fqdn(&self) -> zbus::Result<String>;

        fn entry_group_new(&self) -> zbus::Result<zbus::zvariant::OwnedObjectPath>;

        #[zbus(signal)]
        fn state_changed(&self, state: i32, error: &str) -> zbus::Result<()>;
    }
}

mod entry_group {
    #[zbus::proxy(
        interface = "org.freedesktop.Avahi.EntryGroup",
        default_service = "org.freedesktop.Avahi",
        gen_blocking = false
    )]
    pub trait EntryGroup {
        #[allow(clippy::too_many_arguments)]
        fn add_record(
            &self,
            interface: i32,
            protocol: i32,
            flags: u32,
            name: &str,
            clazz: u16,
            type_: u16,
            ttl: u32,
            rdata: &[u8],
        ) -> zbus::Result<()>;

        fn commit(&self) -> zbus::Result<()>;

        fn reset(&self) -> zbus::Result<()>;

        fn free(&self) -> zbus::Result<()>;

        #[zbus(signal)]
        fn state_changed(&self, state: i32, error: &str) -> zbus::Result<()>;
    }
}

use entry_group::EntryGroupProxy;
use server::AvahiServerProxy;

/// Open a connection to the system bus.
pub async fn connect_system_bus() -> Result<Connection, AdvertiseError> {
    Ok(Connection::system().await?)
}

/// Forward Avahi name ownership changes as `DaemonAppeared`/`DaemonDisappeared`.
///
/// Emits `DaemonAppeared` immediately if the daemon already owns its name.
pub async fn spawn_bus_watcher(
    conn: &Connection,
    events: UnboundedSender<AdvertiserEvent>,
) -> Result<JoinHandle<()>, AdvertiseError> {
    let dbus = DBusProxy::new(conn).await?;
    let mut changes = dbus.receive_name_owner_changed().await?;

    let name = BusName::try_from(AVAHI_SERVICE).map_err(zbus::Error::from)?;
    if dbus.name_has_owner(name).await? {
        let _ = events.send(AdvertiserEvent::DaemonAppeared);
    }

    Ok(tokio::spawn(async move {
        while let Some(signal) = changes.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            if args.name().as_str() != AVAHI_SERVICE {
                continue;
            }

            let gone = args.old_owner().is_some();
            if gone && events.send(AdvertiserEvent::DaemonDisappeared).is_err() {
                break;
            }
            let back = args.new_owner().is_some();
            if back && events.send(AdvertiserEvent::DaemonAppeared).is_err() {
                break;
            }
        }
        tracing::debug!("Bus watcher finished");
    }))
}

/// `DiscoveryDaemon` backed by Avahi.
///
/// Server and entry group state signals are forwarded into `events` by
/// per-handle tasks that are aborted when the handle is dropped.
pub struct AvahiDaemon {
    conn: Connection,
    events: UnboundedSender<AdvertiserEvent>,
    server: Option<AvahiServerProxy<'static>>,
    server_task: Option<JoinHandle<()>>,
    group: Option<EntryGroupProxy<'static>>,
    group_task: Option<JoinHandle<()>>,
}

impl AvahiDaemon {
    pub fn new(conn: Connection, events: UnboundedSender<AdvertiserEvent>) -> Self {
        Self {
            conn,
            events,
            server: None,
            server_task: None,
            group: None,
            group_task: None,
        }
    }

    fn server(&self) -> Result<&AvahiServerProxy<'static>, AdvertiseError> {
        self.server
            .as_ref()
            .ok_or_else(|| AdvertiseError::Daemon("no server handle".into()))
    }

    fn drop_group(&mut self) -> Option<EntryGroupProxy<'static>> {
        if let Some(task) = self.group_task.take() {
            task.abort();
        }
        self.group.take()
    }
}

#[async_trait]
impl DiscoveryDaemon for AvahiDaemon {
    async fn connect(&mut self) -> Result<ServerState, AdvertiseError> {
        self.release();

        let server = AvahiServerProxy::builder(&self.conn)
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        let mut changes = server.receive_state_changed().await?;
        let state = ServerState::from(server.get_state().await?);

        let events = self.events.clone();
        self.server_task = Some(tokio::spawn(async move {
            while let Some(signal) = changes.next().await {
                match signal.args() {
                    Ok(args) => {
                        let state = ServerState::from(*args.state());
                        if events.send(AdvertiserEvent::ServerStateChanged(state)).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Malformed server StateChanged signal"),
                }
            }
        }));
        self.server = Some(server);

        tracing::debug!(?state, "Connected to Avahi");
        Ok(state)
    }

    async fn host_fqdn(&mut self) -> Result<String, AdvertiseError> {
        Ok(self.server()?.get_host_name_fqdn().await?)
    }

    async fn commit_group(&mut self, records: &[AliasRecord]) -> Result<(), AdvertiseError> {
        let path = self.server()?.entry_group_new().await?;
        let group = EntryGroupProxy::builder(&self.conn)
            .path(path.into_inner())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        let mut changes = group.receive_state_changed().await?;

        let events = self.events.clone();
        self.drop_group();
        self.group_task = Some(tokio::spawn(async move {
            while let Some(signal) = changes.next().await {
                match signal.args() {
                    Ok(args) => {
                        let state = EntryGroupState::from(*args.state());
                        if events.send(AdvertiserEvent::EntryGroupStateChanged(state)).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Malformed group StateChanged signal"),
                }
            }
        }));
        self.group = Some(group.clone());

        for record in records {
            group
                .add_record(
                    IF_UNSPEC,
                    PROTO_INET,
                    0,
                    &record.name,
                    CLASS_IN,
                    TYPE_CNAME,
                    record.ttl,
                    &record.rdata,
                )
                .await?;
        }
        group.commit().await?;
        Ok(())
    }

    async fn reset_group(&mut self) -> Result<(), AdvertiseError> {
        if let Some(group) = self.drop_group() {
            let reset = group.reset().await;
            let free = group.free().await;
            reset?;
            free?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.drop_group();
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
        self.server = None;
    }
}

impl Drop for AvahiDaemon {
    fn drop(&mut self) {
        self.release();
    }
}
