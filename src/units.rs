//! Unit controller
//!
//! Drives systemd units over the control bus. Each operation opens its own
//! connection through [with_connection] and releases it before returning.
//!
//! Start, stop and restart enqueue a job and then wait for the matching
//! JobRemoved signal:
//!
//! ```text
//!   subscribe ──► enqueue ──► JobRemoved(job) ──► done ──► Ok(Job)
//!                    │              │
//!                    │              └──► failed/canceled/... ──► JobFailed
//!                    └── no signal within job timeout ──► Timeout
//! ```
//!
//! A timed out job is not canceled; systemd keeps running it.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{self, PropertyMap, Tag};
use crate::dbus::systemd::UnitRow;
use crate::dbus::{with_connection, Connector, JobSignals, LifecycleAction, ManagerBus};
use crate::error::{Error, Result};

const UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";

/// Signal recipients for KillUnit
const KILL_WHOM: &str = "all";

/// Unit properties read back as unsigned 64-bit counters
const COUNTER_PROPERTIES: &[&str] = &["CPUShares", "LimitNOFILE", "LimitNOFILESoft"];

/// Manager properties readable through [UnitController::manager_property]
pub const MANAGER_PROPERTIES: &[(&str, Tag)] = &[
    ("SystemState", Tag::String),
    ("Version", Tag::String),
    ("Virtualization", Tag::String),
    ("Architecture", Tag::String),
    ("Features", Tag::String),
    ("NFailedUnits", Tag::UInt32),
    ("NNames", Tag::UInt32),
];

/// A unit as listed by ListUnits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Unit {
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub followed: String,
    pub path: String,
    pub job_id: u32,
    pub job_type: String,
    pub job_path: String,
}

impl From<UnitRow> for Unit {
    fn from(row: UnitRow) -> Self {
        let (
            name,
            description,
            load_state,
            active_state,
            sub_state,
            followed,
            path,
            job_id,
            job_type,
            job_path,
        ) = row;
        Self {
            name,
            description,
            load_state,
            active_state,
            sub_state,
            followed,
            path: path.as_str().to_string(),
            job_id,
            job_type,
            job_path: job_path.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub unit: String,
    pub active_state: String,
}

/// A single property rendered as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UnitProperties {
    Single(Property),
    All(PropertyMap),
}

/// Unit types, each with its own org.freedesktop.systemd1.<Type> interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    Service,
    Socket,
    Target,
    Device,
    Mount,
    Automount,
    Swap,
    Timer,
    Path,
    Slice,
    Scope,
}

impl UnitType {
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Service => "org.freedesktop.systemd1.Service",
            Self::Socket => "org.freedesktop.systemd1.Socket",
            Self::Target => "org.freedesktop.systemd1.Target",
            Self::Device => "org.freedesktop.systemd1.Device",
            Self::Mount => "org.freedesktop.systemd1.Mount",
            Self::Automount => "org.freedesktop.systemd1.Automount",
            Self::Swap => "org.freedesktop.systemd1.Swap",
            Self::Timer => "org.freedesktop.systemd1.Timer",
            Self::Path => "org.freedesktop.systemd1.Path",
            Self::Slice => "org.freedesktop.systemd1.Slice",
            Self::Scope => "org.freedesktop.systemd1.Scope",
        }
    }

    /// Type from the unit name suffix ("foo.socket" -> Socket), service otherwise
    pub fn from_unit_name(name: &str) -> Self {
        name.rsplit_once('.')
            .and_then(|(_, suffix)| suffix.parse().ok())
            .unwrap_or(Self::Service)
    }

    /// Explicit type if given, else derived from the name
    fn resolve(name: &str, unit_type: Option<&str>) -> Result<Self> {
        match unit_type.filter(|t| !t.is_empty()) {
            Some(t) => t.parse(),
            None => Ok(Self::from_unit_name(name)),
        }
    }
}

impl FromStr for UnitType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "service" => Ok(Self::Service),
            "socket" => Ok(Self::Socket),
            "target" => Ok(Self::Target),
            "device" => Ok(Self::Device),
            "mount" => Ok(Self::Mount),
            "automount" => Ok(Self::Automount),
            "swap" => Ok(Self::Swap),
            "timer" => Ok(Self::Timer),
            "path" => Ok(Self::Path),
            "slice" => Ok(Self::Slice),
            "scope" => Ok(Self::Scope),
            _ => Err(Error::parse("unit type", s)),
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Pending,
    Done,
    Failed,
    Canceled,
}

impl JobOutcome {
    /// Classify the result string of JobRemoved
    pub fn from_result(result: &str) -> Self {
        match result {
            "done" => Self::Done,
            "canceled" => Self::Canceled,
            _ => Self::Failed,
        }
    }
}

/// A lifecycle job enqueued by this request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: u32,
    pub path: String,
    pub unit: String,
    pub outcome: JobOutcome,
}

impl Job {
    /// Job at `path` ("/org/freedesktop/systemd1/job/42"), not yet finished
    pub fn pending(unit: &str, path: String) -> Self {
        let id = path
            .rsplit('/')
            .next()
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);
        Self {
            id,
            path,
            unit: unit.to_string(),
            outcome: JobOutcome::Pending,
        }
    }

    /// Wait for this job's JobRemoved signal, at most `timeout`.
    ///
    /// Signals for other jobs are skipped. `signals` must have been
    /// subscribed before the job was enqueued.
    pub async fn wait<S: JobSignals>(mut self, signals: &mut S, timeout: Duration) -> Result<Self> {
        let job = self.path.as_str();
        let completion = tokio::time::timeout(timeout, async {
            while let Some(event) = signals.next_event().await {
                if event.job == job {
                    return Some(event.result);
                }
            }
            None
        })
        .await;

        let result = match completion {
            Ok(Some(result)) => result,
            Ok(None) => {
                log::error!("JobRemoved stream closed while waiting for job {}", self.path);
                return Err(Error::JobSignalsClosed { unit: self.unit });
            }
            Err(_) => {
                log::warn!("Job {} for {} still running after {:?}", self.id, self.unit, timeout);
                return Err(Error::Timeout {
                    unit: self.unit,
                    job: self.path,
                    timeout,
                });
            }
        };

        self.outcome = JobOutcome::from_result(&result);
        if self.outcome == JobOutcome::Done {
            log::info!("Job {} for {} done", self.id, self.unit);
            Ok(self)
        } else {
            log::error!("Job {} for {} finished: {}", self.id, self.unit, result);
            Err(Error::JobFailed {
                unit: self.unit,
                result,
            })
        }
    }
}

/// Action names accepted in a [UnitAction] request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
    Reload,
    Kill,
    GetStatus,
    GetProperty,
    SetProperty,
    GetTypeProperty,
}

/// A parsed unit request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitAction {
    pub action: ActionKind,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Result of [UnitController::dispatch]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionReply {
    Done { unit: String, action: &'static str },
    Job(Job),
    Status(UnitStatus),
    Properties(UnitProperties),
}

/// Issues unit operations, one bus connection per call
pub struct UnitController<C> {
    connector: C,
    job_timeout: Duration,
}

impl<C> UnitController<C>
where
    C: Connector,
    C::Connection: ManagerBus,
{
    pub fn new(connector: C, job_timeout: Duration) -> Self {
        Self {
            connector,
            job_timeout,
        }
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    pub async fn list_units(&self) -> Result<Vec<Unit>> {
        with_connection(&self.connector, |bus| async move {
            bus.list_units()
                .await
                .inspect_err(|e| log::error!("Failed ListUnits: {}", e))
        })
        .await
    }

    /// Active state of exactly one unit
    pub async fn unit_status(&self, name: &str) -> Result<UnitStatus> {
        let units = with_connection(&self.connector, |bus| async move {
            bus.list_units_by_names(&[name])
                .await
                .inspect_err(|e| log::error!("Failed to get unit '{}' status: {}", name, e))
        })
        .await?;

        // The row carries the primary id, which differs from `name` for an
        // alias. Unknown names come back as a synthesized not-found entry.
        let unit = units
            .into_iter()
            .next()
            .filter(|u| !(u.load_state == "not-found" && u.active_state == "inactive"))
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if unit.name != name {
            log::debug!("{} resolved to {}", name, unit.name);
        }

        Ok(UnitStatus {
            unit: name.to_string(),
            active_state: unit.active_state,
        })
    }

    pub async fn start_unit(&self, name: &str) -> Result<Job> {
        self.run_job(LifecycleAction::Start, name).await
    }

    pub async fn stop_unit(&self, name: &str) -> Result<Job> {
        self.run_job(LifecycleAction::Stop, name).await
    }

    pub async fn restart_unit(&self, name: &str) -> Result<Job> {
        self.run_job(LifecycleAction::Restart, name).await
    }

    async fn run_job(&self, action: LifecycleAction, name: &str) -> Result<Job> {
        let timeout = self.job_timeout;
        log::info!("{}: {} mode={}", action.method(), name, action.mode());

        with_connection(&self.connector, |bus| async move {
            let mut signals = bus.job_signals().await?;
            let path = bus
                .enqueue(action, name)
                .await
                .inspect_err(|e| log::error!("{} {} failed: {}", action.method(), name, e))?;
            Job::pending(name, path).wait(&mut signals, timeout).await
        })
        .await
    }

    /// Reload the manager configuration. No job is tracked.
    pub async fn reload_manager(&self) -> Result<()> {
        log::info!("Reload");
        with_connection(&self.connector, |bus| async move {
            bus.reload()
                .await
                .inspect_err(|e| log::error!("Failed to reload manager: {}", e))
        })
        .await
    }

    /// Send a signal, given as decimal text, to all processes of a unit
    pub async fn kill_unit(&self, name: &str, signal: &str) -> Result<()> {
        let signal = parse_signal(signal)?;
        log::info!("KillUnit: {} signal={}", name, signal);

        with_connection(&self.connector, |bus| async move {
            bus.kill_unit(name, KILL_WHOM, signal)
                .await
                .inspect_err(|e| log::error!("Failed to kill unit {}: {}", name, e))
        })
        .await
    }

    /// One property as text, or the whole Unit interface when `property`
    /// is empty.
    ///
    /// A named property is read from the unit's type interface first and
    /// from the Unit interface if the type interface does not have it.
    pub async fn unit_property(
        &self,
        name: &str,
        property: Option<&str>,
        unit_type: Option<&str>,
    ) -> Result<UnitProperties> {
        let Some(property) = property.filter(|p| !p.is_empty()) else {
            let all = with_connection(&self.connector, |bus| async move {
                bus.unit_properties(name, UNIT_INTERFACE)
                    .await
                    .inspect_err(|e| log::error!("Failed to get properties of {}: {}", name, e))
            })
            .await?;
            return Ok(UnitProperties::All(codec::properties_to_json(all)));
        };

        let interface = UnitType::resolve(name, unit_type)?.interface();
        let value = with_connection(&self.connector, |bus| async move {
            let value = match bus.unit_property(name, interface, property).await {
                Err(Error::BusCall { source, .. }) => {
                    log::debug!("{} not on {} for {}: {}", property, interface, name, source);
                    bus.unit_property(name, UNIT_INTERFACE, property).await
                }
                other => other,
            };
            value.inspect_err(|e| log::error!("Failed to get {} of {}: {}", property, name, e))
        })
        .await?;

        let value = if COUNTER_PROPERTIES.contains(&property) {
            codec::decode(property, &value, Tag::UInt64)?
        } else {
            codec::value_text(&value)
        };

        Ok(UnitProperties::Single(Property {
            property: property.to_string(),
            value,
        }))
    }

    /// Write one whitelisted property for the lifetime of the unit
    pub async fn set_unit_property(&self, name: &str, property: &str, value: &str) -> Result<()> {
        let value = codec::encode(property, value)
            .inspect_err(|e| log::error!("Refusing to set {} on {}: {}", property, name, e))?;
        log::info!("SetUnitProperties: {} {}={}", name, property, value);

        with_connection(&self.connector, |bus| async move {
            bus.set_unit_properties(name, true, &[(property.to_string(), value)])
                .await
                .inspect_err(|e| log::error!("Failed to set {} on {}: {}", property, name, e))
        })
        .await
    }

    /// All properties of the unit's type interface
    pub async fn unit_type_properties(&self, name: &str, unit_type: &str) -> Result<PropertyMap> {
        let interface = unit_type.parse::<UnitType>()?.interface();
        let all = with_connection(&self.connector, |bus| async move {
            bus.unit_properties(name, interface).await.inspect_err(|e| {
                log::error!("Failed to get {} properties of {}: {}", interface, name, e)
            })
        })
        .await?;
        Ok(codec::properties_to_json(all))
    }

    /// One of [MANAGER_PROPERTIES]
    pub async fn manager_property(&self, property: &str) -> Result<Property> {
        let tag = MANAGER_PROPERTIES
            .iter()
            .find(|(name, _)| *name == property)
            .map(|(_, tag)| *tag)
            .ok_or_else(|| Error::UnknownProperty(property.to_string()))?;

        let value = with_connection(&self.connector, |bus| async move {
            bus.manager_property(property).await.inspect_err(|e| {
                log::error!("Failed to get systemd1.Manager.{}: {}", property, e)
            })
        })
        .await?;

        Ok(Property {
            property: property.to_string(),
            value: codec::decode(property, &value, tag)?,
        })
    }

    /// Run a parsed request
    pub async fn dispatch(&self, request: UnitAction) -> Result<ActionReply> {
        let unit = request.unit.as_str();
        let value = request.value.as_deref().unwrap_or("");
        let property = request.property.as_deref().unwrap_or("");

        match request.action {
            ActionKind::Start => self.start_unit(unit).await.map(ActionReply::Job),
            ActionKind::Stop => self.stop_unit(unit).await.map(ActionReply::Job),
            ActionKind::Restart => self.restart_unit(unit).await.map(ActionReply::Job),
            ActionKind::Reload => {
                self.reload_manager().await?;
                Ok(ActionReply::Done {
                    unit: request.unit,
                    action: "reload",
                })
            }
            ActionKind::Kill => {
                self.kill_unit(unit, value).await?;
                Ok(ActionReply::Done {
                    unit: request.unit,
                    action: "kill",
                })
            }
            ActionKind::GetStatus => self.unit_status(unit).await.map(ActionReply::Status),
            ActionKind::GetProperty => self
                .unit_property(unit, Some(property), request.unit_type.as_deref())
                .await
                .map(ActionReply::Properties),
            ActionKind::SetProperty => {
                self.set_unit_property(unit, property, value).await?;
                Ok(ActionReply::Done {
                    unit: request.unit,
                    action: "set-property",
                })
            }
            ActionKind::GetTypeProperty => self
                .unit_type_properties(unit, request.unit_type.as_deref().unwrap_or(""))
                .await
                .map(|all| ActionReply::Properties(UnitProperties::All(all))),
        }
    }
}

/// Parse a decimal signal number in 1..=64
fn parse_signal(text: &str) -> Result<i32> {
    text.trim()
        .parse::<i32>()
        .ok()
        .filter(|n| (1..=64).contains(n))
        .ok_or_else(|| {
            log::error!("Failed to parse signal number '{}'", text);
            Error::parse("signal number", text)
        })
}
