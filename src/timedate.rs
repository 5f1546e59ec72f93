//! Time and date settings from systemd-timedated
//!
//! Every query reads the whole fixed property set into a fresh
//! [TimeDateSnapshot]; nothing is kept between requests. A property that
//! cannot be read or decoded is logged and left empty, the rest of the
//! snapshot is still returned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{self, parse_bool, Tag};
use crate::dbus::{with_connection, Connector, TimedateBus, TimedateCall, TimedateReply};
use crate::error::{Error, Result};
use crate::units::Property;

/// Properties of org.freedesktop.timedate1 and their types
pub const TIMEDATE_PROPERTIES: &[(&str, Tag)] = &[
    ("Timezone", Tag::String),
    ("LocalRTC", Tag::Bool),
    ("CanNTP", Tag::Bool),
    ("NTP", Tag::Bool),
    ("NTPSynchronized", Tag::Bool),
    ("TimeUSec", Tag::TimestampMicros),
    ("RTCTimeUSec", Tag::TimestampMicros),
];

/// Methods of org.freedesktop.timedate1 that may be invoked
pub const TIMEDATE_METHODS: &[&str] = &[
    "SetTime",
    "SetTimezone",
    "SetLocalRTC",
    "SetNTP",
    "ListTimezones",
];

/// Text value of every timedated property, "" where it could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TimeDateSnapshot {
    values: BTreeMap<&'static str, String>,
}

impl TimeDateSnapshot {
    /// Snapshot with every property present and empty
    pub fn empty() -> Self {
        Self {
            values: TIMEDATE_PROPERTIES
                .iter()
                .map(|(name, _)| (*name, String::new()))
                .collect(),
        }
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.values.get(property).map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    fn set(&mut self, property: &'static str, value: String) {
        self.values.insert(property, value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TimeDateQuery {
    All(TimeDateSnapshot),
    One(Property),
}

/// Body of a timedated method request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeDateRequest {
    pub property: String,
    #[serde(default)]
    pub value: String,
}

/// Reads and changes systemd-timedated settings
pub struct TimeDateSync<C> {
    connector: C,
}

impl<C> TimeDateSync<C>
where
    C: Connector,
    C::Connection: TimedateBus,
{
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Read every property into a new snapshot
    pub async fn refresh_snapshot(&self) -> Result<TimeDateSnapshot> {
        with_connection(&self.connector, |bus| async move {
            let mut snapshot = TimeDateSnapshot::empty();
            for (name, tag) in TIMEDATE_PROPERTIES {
                let value = match bus.timedate_property(name).await {
                    Ok(raw) => codec::decode(name, &raw, *tag),
                    Err(e) => Err(e),
                };
                match value {
                    Ok(value) => snapshot.set(*name, value),
                    Err(e) => log::warn!("Failed to get org.freedesktop.timedate1.{}: {}", name, e),
                }
            }
            Ok(snapshot)
        })
        .await
    }

    /// The whole snapshot, or one `{property, value}` pair.
    ///
    /// A name outside [TIMEDATE_PROPERTIES] has no value and is answered
    /// with an empty string, like a property that could not be read.
    pub async fn query_snapshot(&self, property: Option<&str>) -> Result<TimeDateQuery> {
        let property = property.filter(|p| !p.is_empty());
        let snapshot = self.refresh_snapshot().await?;
        Ok(match property {
            None => TimeDateQuery::All(snapshot),
            Some(name) => TimeDateQuery::One(Property {
                property: name.to_string(),
                value: snapshot.get(name).unwrap_or_default().to_string(),
            }),
        })
    }

    /// Invoke one of [TIMEDATE_METHODS] with `value` as its argument
    pub async fn set_property(&self, method: &str, value: &str) -> Result<TimedateReply> {
        let call = timedate_call(method, value)
            .inspect_err(|e| log::error!("Failed to set timedate: {}", e))?;
        log::info!("timedate1.{} '{}'", call.method(), value);

        with_connection(&self.connector, |bus| async move {
            let method = call.method();
            bus.invoke_timedate(call)
                .await
                .inspect_err(|e| log::error!("Failed to call timedate1.{}: {}", method, e))
        })
        .await
    }

    pub async fn list_timezones(&self) -> Result<Vec<String>> {
        match self.set_property("ListTimezones", "").await? {
            TimedateReply::Timezones(zones) => Ok(zones),
            TimedateReply::Done => {
                log::warn!("timedate1.ListTimezones returned no zone list");
                Err(Error::Decode {
                    property: "ListTimezones".to_string(),
                    expected: Tag::String,
                    actual: "no reply body".to_string(),
                })
            }
        }
    }
}

/// Validate a method name and type its argument
pub fn timedate_call(method: &str, value: &str) -> Result<TimedateCall> {
    let boolean = || parse_bool(value).ok_or_else(|| Error::parse("boolean", value));

    match method {
        "SetTime" => value
            .trim()
            .parse()
            .map(TimedateCall::SetTime)
            .map_err(|_| Error::parse("time in microseconds", value)),
        "SetTimezone" => Ok(TimedateCall::SetTimezone(value.to_string())),
        "SetLocalRTC" => boolean().map(TimedateCall::SetLocalRtc),
        "SetNTP" => boolean().map(TimedateCall::SetNtp),
        "ListTimezones" => Ok(TimedateCall::ListTimezones),
        _ => Err(Error::UnknownProperty(method.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_has_every_property() {
        let snapshot = TimeDateSnapshot::empty();
        assert_eq!(snapshot.len(), TIMEDATE_PROPERTIES.len());
        assert!(snapshot.iter().all(|(_, v)| v.is_empty()));
        assert_eq!(snapshot.get("Timezone"), Some(""));
        assert_eq!(snapshot.get("Bogus"), None);
    }

    #[test]
    fn test_methods_cover_calls() {
        for method in TIMEDATE_METHODS {
            let value = match *method {
                "SetTime" => "1700000000000000",
                "SetLocalRTC" | "SetNTP" => "true",
                _ => "UTC",
            };
            let call = timedate_call(method, value).unwrap();
            assert_eq!(call.method(), *method);
        }
    }

    #[test]
    fn test_timedate_call_parsing() {
        assert_eq!(timedate_call("SetNTP", "off").unwrap(), TimedateCall::SetNtp(false));
        assert_eq!(
            timedate_call("SetTimezone", "Europe/Copenhagen").unwrap(),
            TimedateCall::SetTimezone("Europe/Copenhagen".into())
        );
        assert_eq!(timedate_call("SetTime", "-5").unwrap(), TimedateCall::SetTime(-5));
        assert!(matches!(timedate_call("SetNTP", "perhaps"), Err(Error::Parse { .. })));
        assert!(matches!(timedate_call("SetTime", "noon"), Err(Error::Parse { .. })));
        assert!(matches!(timedate_call("SetHostname", "x"), Err(Error::UnknownProperty(_))));
    }

    #[test]
    fn test_snapshot_serializes_as_map() {
        let json = serde_json::to_value(TimeDateSnapshot::empty()).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), 7);
        assert_eq!(map["NTPSynchronized"], "");
    }
}
