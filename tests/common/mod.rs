//! In-memory stand-in for the control bus

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use zbus::zvariant::{OwnedValue, Value};

use hostd::codec::PropertyValue;
use hostd::dbus::{
    Connector, JobEvent, JobSignals, LifecycleAction, ManagerBus, TimedateBus, TimedateCall,
    TimedateReply,
};
use hostd::units::Unit;
use hostd::{Error, Result};

/// What happens to an enqueued job
#[derive(Debug, Clone)]
pub enum JobBehavior {
    /// JobRemoved arrives with this result, after an unrelated job's signal
    Complete(String),
    /// No JobRemoved ever arrives
    Never,
    /// The signal stream ends without a JobRemoved for the job
    Close,
}

#[derive(Debug)]
pub struct MockState {
    pub connects: usize,
    pub releases: usize,
    pub fail_connect: bool,
    /// Method names in call order
    pub calls: Vec<String>,
    pub units: Vec<Unit>,
    /// Alias name -> primary unit name
    pub aliases: HashMap<String, String>,
    /// (interface, property) -> value, shared by every unit
    pub unit_properties: HashMap<(String, String), OwnedValue>,
    pub manager_properties: HashMap<String, OwnedValue>,
    pub timedate_properties: HashMap<String, OwnedValue>,
    pub timezones: Vec<String>,
    /// ListTimezones answers without a zone list
    pub timezones_missing: bool,
    pub job: JobBehavior,
    pub next_job: u32,
    pub set_properties: Vec<(String, bool, Vec<(String, PropertyValue)>)>,
    pub killed: Vec<(String, String, i32)>,
    pub timedate_calls: Vec<TimedateCall>,
    subscribers: Vec<mpsc::UnboundedSender<JobEvent>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connects: 0,
            releases: 0,
            fail_connect: false,
            calls: Vec::new(),
            units: Vec::new(),
            aliases: HashMap::new(),
            unit_properties: HashMap::new(),
            manager_properties: HashMap::new(),
            timedate_properties: HashMap::new(),
            timezones: Vec::new(),
            timezones_missing: false,
            job: JobBehavior::Complete("done".into()),
            next_job: 100,
            set_properties: Vec::new(),
            killed: Vec::new(),
            timedate_calls: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

pub fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
    OwnedValue::try_from(value.into()).unwrap()
}

fn bus_error(method: &'static str, message: String) -> Error {
    Error::BusCall {
        method,
        source: zbus::Error::Failure(message),
    }
}

pub fn unit(name: &str, load_state: &str, active_state: &str) -> Unit {
    Unit {
        name: name.into(),
        description: format!("Mock {}", name),
        load_state: load_state.into(),
        active_state: active_state.into(),
        sub_state: if active_state == "active" { "running" } else { "dead" }.into(),
        followed: String::new(),
        path: hostd::dbus::unit_object_path(name),
        job_id: 0,
        job_type: String::new(),
        job_path: "/".into(),
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Connections opened and not yet released
    pub fn open_connections(&self) -> usize {
        let state = self.state();
        state.connects - state.releases
    }
}

impl Connector for MockConnector {
    type Connection = MockBus;

    async fn connect(&self) -> Result<MockBus> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(Error::Connection(zbus::Error::Failure("bus unavailable".into())));
        }
        state.connects += 1;
        Ok(MockBus {
            state: Arc::clone(&self.state),
        })
    }

    async fn release(&self, _conn: MockBus) {
        self.state().releases += 1;
    }
}

#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    fn record(&self, method: &str) -> MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());
        state
    }
}

pub struct MockJobSignals {
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobSignals for MockJobSignals {
    async fn next_event(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

impl ManagerBus for MockBus {
    type Signals = MockJobSignals;

    async fn list_units(&self) -> Result<Vec<Unit>> {
        Ok(self.record("ListUnits").units.clone())
    }

    async fn list_units_by_names(&self, names: &[&str]) -> Result<Vec<Unit>> {
        let state = self.record("ListUnitsByNames");
        Ok(names
            .iter()
            .map(|name| {
                let primary = state.aliases.get(*name).map(String::as_str).unwrap_or(*name);
                state
                    .units
                    .iter()
                    .find(|u| u.name == primary)
                    .cloned()
                    .unwrap_or_else(|| unit(name, "not-found", "inactive"))
            })
            .collect())
    }

    async fn job_signals(&self) -> Result<MockJobSignals> {
        let mut state = self.record("Subscribe");
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(MockJobSignals { rx })
    }

    async fn enqueue(&self, action: LifecycleAction, unit: &str) -> Result<String> {
        let mut state = self.record(action.method());
        if !state.units.iter().any(|u| u.name == unit) {
            return Err(bus_error(action.method(), format!("Unit {} not found.", unit)));
        }

        state.next_job += 1;
        let id = state.next_job;
        let path = format!("/org/freedesktop/systemd1/job/{}", id);

        match state.job.clone() {
            JobBehavior::Complete(result) => {
                let other = JobEvent {
                    id: id + 1000,
                    job: format!("/org/freedesktop/systemd1/job/{}", id + 1000),
                    unit: "other.service".into(),
                    result: "failed".into(),
                };
                let event = JobEvent {
                    id,
                    job: path.clone(),
                    unit: unit.to_string(),
                    result,
                };
                for tx in &state.subscribers {
                    let _ = tx.send(other.clone());
                    let _ = tx.send(event.clone());
                }
            }
            JobBehavior::Never => {}
            JobBehavior::Close => state.subscribers.clear(),
        }

        Ok(path)
    }

    async fn reload(&self) -> Result<()> {
        self.record("Reload");
        Ok(())
    }

    async fn kill_unit(&self, unit: &str, whom: &str, signal: i32) -> Result<()> {
        let mut state = self.record("KillUnit");
        state.killed.push((unit.to_string(), whom.to_string(), signal));
        Ok(())
    }

    async fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(String, PropertyValue)],
    ) -> Result<()> {
        let mut state = self.record("SetUnitProperties");
        state
            .set_properties
            .push((unit.to_string(), runtime, properties.to_vec()));
        Ok(())
    }

    async fn unit_property(
        &self,
        _unit: &str,
        interface: &str,
        property: &str,
    ) -> Result<OwnedValue> {
        let state = self.record("Get");
        state
            .unit_properties
            .get(&(interface.to_string(), property.to_string()))
            .map(|v| v.try_clone().unwrap())
            .ok_or_else(|| bus_error("Get", format!("Unknown property {}.{}", interface, property)))
    }

    async fn unit_properties(
        &self,
        _unit: &str,
        interface: &str,
    ) -> Result<HashMap<String, OwnedValue>> {
        let state = self.record("GetAll");
        Ok(state
            .unit_properties
            .iter()
            .filter(|((iface, _), _)| iface == interface)
            .map(|((_, name), v)| (name.clone(), v.try_clone().unwrap()))
            .collect())
    }

    async fn manager_property(&self, property: &str) -> Result<OwnedValue> {
        let state = self.record("Get");
        state
            .manager_properties
            .get(property)
            .map(|v| v.try_clone().unwrap())
            .ok_or_else(|| bus_error("Get", format!("Unknown property {}", property)))
    }
}

impl TimedateBus for MockBus {
    async fn timedate_property(&self, name: &str) -> Result<OwnedValue> {
        let state = self.record("Get");
        state
            .timedate_properties
            .get(name)
            .map(|v| v.try_clone().unwrap())
            .ok_or_else(|| bus_error("Get", format!("No such property {}", name)))
    }

    async fn invoke_timedate(&self, call: TimedateCall) -> Result<TimedateReply> {
        let mut state = self.record(call.method());
        let reply = match &call {
            TimedateCall::ListTimezones if state.timezones_missing => TimedateReply::Done,
            TimedateCall::ListTimezones => TimedateReply::Timezones(state.timezones.clone()),
            _ => TimedateReply::Done,
        };
        state.timedate_calls.push(call);
        Ok(reply)
    }
}

/// Controller state with a running unit and the usual timedated properties
pub fn populated() -> MockConnector {
    let connector = MockConnector::new();
    {
        let mut state = connector.state();
        state.units = vec![
            unit("sshd.service", "loaded", "active"),
            unit("cron.service", "loaded", "inactive"),
        ];
        state.unit_properties.insert(
            ("org.freedesktop.systemd1.Service".into(), "CPUShares".into()),
            owned(1024u64),
        );
        state.unit_properties.insert(
            ("org.freedesktop.systemd1.Service".into(), "MainPID".into()),
            owned(4242u32),
        );
        state.unit_properties.insert(
            ("org.freedesktop.systemd1.Unit".into(), "ActiveState".into()),
            owned("active"),
        );
        state.unit_properties.insert(
            ("org.freedesktop.systemd1.Unit".into(), "Id".into()),
            owned("sshd.service"),
        );
        state
            .manager_properties
            .insert("Version".into(), owned("255.4"));
        state
            .manager_properties
            .insert("NFailedUnits".into(), owned(2u32));

        let timedate = &mut state.timedate_properties;
        timedate.insert("Timezone".into(), owned("Europe/Berlin"));
        timedate.insert("LocalRTC".into(), owned(false));
        timedate.insert("CanNTP".into(), owned(true));
        timedate.insert("NTP".into(), owned(true));
        timedate.insert("NTPSynchronized".into(), owned(true));
        timedate.insert("TimeUSec".into(), owned(1_700_000_000_000_000u64));
        timedate.insert("RTCTimeUSec".into(), owned(1_700_000_000_000_000u64));

        state.timezones = vec!["Europe/Berlin".into(), "UTC".into()];
    }
    connector
}
