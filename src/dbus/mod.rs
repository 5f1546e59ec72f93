//! Control bus access
//!
//! Every operation opens its own connection, runs, and releases it before
//! returning, whatever the outcome. Nothing is pooled or shared between
//! requests.
//!
//! - [Connector]: opens and releases connections
//! - [systemd]: org.freedesktop.systemd1.Manager calls ([ManagerBus])
//! - [timedate]: org.freedesktop.timedate1 calls ([TimedateBus])

pub mod systemd;
pub mod timedate;

pub use systemd::{JobEvent, JobSignals, LifecycleAction, ManagerBus};
pub use timedate::{TimedateBus, TimedateCall, TimedateReply};

use std::collections::HashMap;
use std::future::Future;

use zbus::zvariant::OwnedValue;
use zbus::{Connection, Proxy};

use crate::error::{Error, Result};

/// Which bus to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    #[default]
    System,
    Session,
}

impl BusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Session => "session",
        }
    }
}

impl std::str::FromStr for BusKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "session" | "user" => Ok(Self::Session),
            _ => Err(Error::parse("bus", s)),
        }
    }
}

/// Opens connections to the control bus
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    fn release(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;
}

/// Run `op` on a fresh connection, releasing it afterwards.
///
/// The connection is released on both success and error. If `op` panics the
/// connection is dropped during unwinding, which closes it as well.
pub async fn with_connection<C, F, Fut, T>(connector: &C, op: F) -> Result<T>
where
    C: Connector,
    F: FnOnce(C::Connection) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let conn = connector.connect().await?;
    let result = op(conn.clone()).await;
    connector.release(conn).await;
    result
}

/// Private zbus connection to the system or session bus
#[derive(Debug, Clone, Copy, Default)]
pub struct BusConnector {
    kind: BusKind,
}

impl BusConnector {
    pub fn new(kind: BusKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }
}

impl Connector for BusConnector {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection> {
        let conn = match self.kind {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        };
        conn.map_err(|e| {
            log::error!("Failed to connect to {} bus: {}", self.kind.as_str(), e);
            Error::Connection(e)
        })
    }

    async fn release(&self, conn: Connection) {
        if let Err(e) = conn.close().await {
            log::debug!("Closing {} bus connection: {}", self.kind.as_str(), e);
        }
    }
}

async fn properties_proxy<'a>(
    conn: &Connection,
    destination: &'a str,
    path: String,
) -> Result<Proxy<'a>> {
    Proxy::new(conn, destination, path, "org.freedesktop.DBus.Properties")
        .await
        .map_err(Error::bus_call("org.freedesktop.DBus.Properties"))
}

/// Read one property through org.freedesktop.DBus.Properties.Get
pub(crate) async fn get_property(
    conn: &Connection,
    destination: &str,
    path: String,
    interface: &str,
    name: &str,
) -> Result<OwnedValue> {
    properties_proxy(conn, destination, path)
        .await?
        .call("Get", &(interface, name))
        .await
        .map_err(Error::bus_call("Get"))
}

/// Read every property of one interface through org.freedesktop.DBus.Properties.GetAll
pub(crate) async fn get_all_properties(
    conn: &Connection,
    destination: &str,
    path: String,
    interface: &str,
) -> Result<HashMap<String, OwnedValue>> {
    properties_proxy(conn, destination, path)
        .await?
        .call("GetAll", &(interface,))
        .await
        .map_err(Error::bus_call("GetAll"))
}

/// Convert unit name to D-Bus object path string
/// e.g., "docker.service" -> "/org/freedesktop/systemd1/unit/docker_2eservice"
///
/// Everything but ASCII alphanumerics is escaped, underscores included.
pub fn unit_object_path(unit_id: &str) -> String {
    if unit_id.is_empty() {
        return "/org/freedesktop/systemd1/unit/_".to_string();
    }

    let escaped: String = unit_id
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                (b as char).to_string()
            } else {
                format!("_{:02x}", b)
            }
        })
        .collect();

    format!("/org/freedesktop/systemd1/unit/{}", escaped)
}
