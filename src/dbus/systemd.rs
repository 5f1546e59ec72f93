//! org.freedesktop.systemd1.Manager client
//!
//! Calls used by the unit controller:
//! - ListUnits / ListUnitsByNames
//! - StartUnit / StopUnit / RestartUnit, correlated through JobRemoved
//! - Reload, KillUnit, SetUnitProperties
//! - Properties.Get / GetAll on the manager and on unit objects

use std::collections::HashMap;
use std::future::Future;

use futures_lite::stream::{Boxed, StreamExt};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{proxy, Connection};

use super::{get_all_properties, get_property, unit_object_path};
use crate::codec::PropertyValue;
use crate::error::{Error, Result};
use crate::units::Unit;

const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

/// One ListUnits row: name, description, load/active/sub state, followed
/// unit, unit path, job id, job type, job path
pub type UnitRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    OwnedObjectPath,
    u32,
    String,
    OwnedObjectPath,
);

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
pub trait SystemdManager {
    fn list_units(&self) -> zbus::Result<Vec<UnitRow>>;

    fn list_units_by_names(&self, names: &[&str]) -> zbus::Result<Vec<UnitRow>>;

    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn reload(&self) -> zbus::Result<()>;

    fn kill_unit(&self, name: &str, whom: &str, signal: i32) -> zbus::Result<()>;

    fn set_unit_properties(
        &self,
        name: &str,
        runtime: bool,
        properties: &[(&str, Value<'_>)],
    ) -> zbus::Result<()>;

    /// Ask systemd to emit job and unit signals to this client
    fn subscribe(&self) -> zbus::Result<()>;

    /// Emitted when a job completes
    #[zbus(signal)]
    fn job_removed(&self, id: u32, job: ObjectPath<'_>, unit: &str, result: &str)
        -> zbus::Result<()>;
}

/// Lifecycle actions that create a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
}

impl LifecycleAction {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Start => "StartUnit",
            Self::Stop => "StopUnit",
            Self::Restart => "RestartUnit",
        }
    }

    /// Start and restart replace conflicting jobs; stop fails on conflict
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Start | Self::Restart => "replace",
            Self::Stop => "fail",
        }
    }
}

/// Payload of a JobRemoved signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub id: u32,
    pub job: String,
    pub unit: String,
    pub result: String,
}

/// JobRemoved signals in arrival order
pub trait JobSignals: Send {
    /// Next signal, or `None` once the stream has ended
    fn next_event(&mut self) -> impl Future<Output = Option<JobEvent>> + Send;
}

/// Manager calls the unit controller relies on
pub trait ManagerBus: Send + Sync {
    type Signals: JobSignals;

    fn list_units(&self) -> impl Future<Output = Result<Vec<Unit>>> + Send;

    fn list_units_by_names(&self, names: &[&str]) -> impl Future<Output = Result<Vec<Unit>>> + Send;

    /// Subscribe to JobRemoved. Must happen before the job is enqueued so
    /// that its completion cannot be missed.
    fn job_signals(&self) -> impl Future<Output = Result<Self::Signals>> + Send;

    /// Enqueue a lifecycle job, returning its object path
    fn enqueue(
        &self,
        action: LifecycleAction,
        unit: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn reload(&self) -> impl Future<Output = Result<()>> + Send;

    fn kill_unit(
        &self,
        unit: &str,
        whom: &str,
        signal: i32,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(String, PropertyValue)],
    ) -> impl Future<Output = Result<()>> + Send;

    fn unit_property(
        &self,
        unit: &str,
        interface: &str,
        property: &str,
    ) -> impl Future<Output = Result<OwnedValue>> + Send;

    fn unit_properties(
        &self,
        unit: &str,
        interface: &str,
    ) -> impl Future<Output = Result<HashMap<String, OwnedValue>>> + Send;

    fn manager_property(&self, property: &str) -> impl Future<Output = Result<OwnedValue>> + Send;
}

/// JobRemoved signals received over zbus
pub struct BusJobSignals {
    stream: Boxed<JobEvent>,
}

impl JobSignals for BusJobSignals {
    async fn next_event(&mut self) -> Option<JobEvent> {
        self.stream.next().await
    }
}

async fn manager_proxy(conn: &Connection) -> Result<SystemdManagerProxy<'static>> {
    SystemdManagerProxy::new(conn)
        .await
        .map_err(Error::bus_call(MANAGER_INTERFACE))
}

impl ManagerBus for Connection {
    type Signals = BusJobSignals;

    async fn list_units(&self) -> Result<Vec<Unit>> {
        let rows = manager_proxy(self)
            .await?
            .list_units()
            .await
            .map_err(Error::bus_call("ListUnits"))?;
        Ok(rows.into_iter().map(Unit::from).collect())
    }

    async fn list_units_by_names(&self, names: &[&str]) -> Result<Vec<Unit>> {
        let rows = manager_proxy(self)
            .await?
            .list_units_by_names(names)
            .await
            .map_err(Error::bus_call("ListUnitsByNames"))?;
        Ok(rows.into_iter().map(Unit::from).collect())
    }

    async fn job_signals(&self) -> Result<BusJobSignals> {
        let proxy = manager_proxy(self).await?;
        proxy.subscribe().await.map_err(Error::bus_call("Subscribe"))?;

        let stream = proxy
            .receive_job_removed()
            .await
            .map_err(Error::bus_call("JobRemoved"))?
            .filter_map(|signal| {
                let args = signal.args().ok()?;
                Some(JobEvent {
                    id: *args.id(),
                    job: args.job().to_string(),
                    unit: args.unit().to_string(),
                    result: args.result().to_string(),
                })
            })
            .boxed();

        Ok(BusJobSignals { stream })
    }

    async fn enqueue(&self, action: LifecycleAction, unit: &str) -> Result<String> {
        let proxy = manager_proxy(self).await?;
        let mode = action.mode();
        let job = match action {
            LifecycleAction::Start => proxy.start_unit(unit, mode).await,
            LifecycleAction::Stop => proxy.stop_unit(unit, mode).await,
            LifecycleAction::Restart => proxy.restart_unit(unit, mode).await,
        }
        .map_err(Error::bus_call(action.method()))?;
        Ok(job.as_str().to_string())
    }

    async fn reload(&self) -> Result<()> {
        manager_proxy(self)
            .await?
            .reload()
            .await
            .map_err(Error::bus_call("Reload"))
    }

    async fn kill_unit(&self, unit: &str, whom: &str, signal: i32) -> Result<()> {
        manager_proxy(self)
            .await?
            .kill_unit(unit, whom, signal)
            .await
            .map_err(Error::bus_call("KillUnit"))
    }

    async fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(String, PropertyValue)],
    ) -> Result<()> {
        let properties: Vec<(&str, Value<'_>)> = properties
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_bus()))
            .collect();
        manager_proxy(self)
            .await?
            .set_unit_properties(unit, runtime, &properties)
            .await
            .map_err(Error::bus_call("SetUnitProperties"))
    }

    async fn unit_property(
        &self,
        unit: &str,
        interface: &str,
        property: &str,
    ) -> Result<OwnedValue> {
        get_property(self, SYSTEMD_SERVICE, unit_object_path(unit), interface, property).await
    }

    async fn unit_properties(
        &self,
        unit: &str,
        interface: &str,
    ) -> Result<HashMap<String, OwnedValue>> {
        get_all_properties(self, SYSTEMD_SERVICE, unit_object_path(unit), interface).await
    }

    async fn manager_property(&self, property: &str) -> Result<OwnedValue> {
        get_property(
            self,
            SYSTEMD_SERVICE,
            SYSTEMD_PATH.to_string(),
            MANAGER_INTERFACE,
            property,
        )
        .await
    }
}
