//! org.freedesktop.timedate1 client

use std::future::Future;

use serde::Serialize;
use zbus::zvariant::OwnedValue;
use zbus::{proxy, Connection};

use super::get_property;
use crate::error::{Error, Result};

const TIMEDATE_SERVICE: &str = "org.freedesktop.timedate1";
const TIMEDATE_PATH: &str = "/org/freedesktop/timedate1";
const TIMEDATE_INTERFACE: &str = "org.freedesktop.timedate1";

#[proxy(
    interface = "org.freedesktop.timedate1",
    default_service = "org.freedesktop.timedate1",
    default_path = "/org/freedesktop/timedate1"
)]
pub trait Timedate {
    fn set_time(&self, usec_utc: i64, relative: bool, interactive: bool) -> zbus::Result<()>;

    fn set_timezone(&self, timezone: &str, interactive: bool) -> zbus::Result<()>;

    #[zbus(name = "SetLocalRTC")]
    fn set_local_rtc(&self, local_rtc: bool, fix_system: bool, interactive: bool)
        -> zbus::Result<()>;

    #[zbus(name = "SetNTP")]
    fn set_ntp(&self, use_ntp: bool, interactive: bool) -> zbus::Result<()>;

    fn list_timezones(&self) -> zbus::Result<Vec<String>>;
}

/// A timedated method call with its arguments already typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimedateCall {
    /// Absolute wall clock time in microseconds since the epoch
    SetTime(i64),
    SetTimezone(String),
    SetLocalRtc(bool),
    SetNtp(bool),
    ListTimezones,
}

impl TimedateCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::SetTime(_) => "SetTime",
            Self::SetTimezone(_) => "SetTimezone",
            Self::SetLocalRtc(_) => "SetLocalRTC",
            Self::SetNtp(_) => "SetNTP",
            Self::ListTimezones => "ListTimezones",
        }
    }
}

/// Reply of a timedated method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TimedateReply {
    Done,
    Timezones(Vec<String>),
}

/// timedated calls the snapshot sync relies on
pub trait TimedateBus: Send + Sync {
    fn timedate_property(&self, name: &str) -> impl Future<Output = Result<OwnedValue>> + Send;

    fn invoke_timedate(
        &self,
        call: TimedateCall,
    ) -> impl Future<Output = Result<TimedateReply>> + Send;
}

impl TimedateBus for Connection {
    async fn timedate_property(&self, name: &str) -> Result<OwnedValue> {
        get_property(
            self,
            TIMEDATE_SERVICE,
            TIMEDATE_PATH.to_string(),
            TIMEDATE_INTERFACE,
            name,
        )
        .await
    }

    async fn invoke_timedate(&self, call: TimedateCall) -> Result<TimedateReply> {
        let proxy = TimedateProxy::new(self)
            .await
            .map_err(Error::bus_call(TIMEDATE_INTERFACE))?;
        let method = call.method();

        // All calls are non-interactive.
        let reply = match call {
            TimedateCall::SetTime(usec) => proxy
                .set_time(usec, false, false)
                .await
                .map(|_| TimedateReply::Done),
            TimedateCall::SetTimezone(zone) => proxy
                .set_timezone(&zone, false)
                .await
                .map(|_| TimedateReply::Done),
            TimedateCall::SetLocalRtc(local) => proxy
                .set_local_rtc(local, false, false)
                .await
                .map(|_| TimedateReply::Done),
            TimedateCall::SetNtp(enable) => proxy
                .set_ntp(enable, false)
                .await
                .map(|_| TimedateReply::Done),
            TimedateCall::ListTimezones => {
                proxy.list_timezones().await.map(TimedateReply::Timezones)
            }
        };

        reply.map_err(Error::bus_call(method))
    }
}
