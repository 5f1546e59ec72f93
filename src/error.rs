use std::time::Duration;

use crate::codec::Tag;

/// The error type of `hostd`.
///
/// Every operation of the unit controller and the time/date sync returns
/// one of these; the HTTP layer maps them to status codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The control bus could not be reached.
    #[error("cannot connect to dbus: {0}")]
    Connection(zbus::Error),
    /// The daemon rejected a specific call.
    #[error("{method} failed: {source}")]
    BusCall {
        method: &'static str,
        #[source]
        source: zbus::Error,
    },
    /// The name is not in the relevant whitelist or method set.
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    /// A bus value did not carry the tag expected for its property.
    #[error("cannot decode {property}: expected {expected}, got '{actual}'")]
    Decode {
        property: String,
        expected: Tag,
        actual: String,
    },
    /// A client value could not be converted to the property's bus type.
    #[error("cannot encode '{value}' as {tag} for {property}")]
    Encode {
        property: String,
        tag: Tag,
        value: String,
    },
    /// Malformed integer, boolean, signal or unit type text from the client.
    #[error("invalid {what}: '{value}'")]
    Parse { what: &'static str, value: String },
    /// The named unit does not exist.
    #[error("unit not found: {0}")]
    NotFound(String),
    /// The job was not observed to finish in time. It may still complete.
    #[error("timed out after {timeout:?} waiting for job {job} of {unit}")]
    Timeout {
        unit: String,
        job: String,
        timeout: Duration,
    },
    /// The job finished with a result other than "done".
    #[error("job for {unit} finished with result '{result}'")]
    JobFailed { unit: String, result: String },
    /// The JobRemoved signal stream ended before the job finished.
    #[error("lost job signals while waiting for {unit}")]
    JobSignalsClosed { unit: String },
}

impl Error {
    pub(crate) fn bus_call(method: &'static str) -> impl FnOnce(zbus::Error) -> Self {
        move |source| Self::BusCall { method, source }
    }

    pub(crate) fn parse(what: &'static str, value: &str) -> Self {
        Self::Parse {
            what,
            value: value.to_string(),
        }
    }
}

/// Alias for a [Result][std::result::Result] with the error type [Error].
pub type Result<T> = std::result::Result<T, Error>;
