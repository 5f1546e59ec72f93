//! hostd - REST facade for host management over D-Bus
//!
//! A small daemon that:
//! - Lists, starts, stops, restarts, kills and inspects systemd units
//! - Reads and writes a whitelisted set of unit resource properties
//! - Reads and sets systemd-timedated settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  HTTP (axum)                    │
//! ├─────────────────────────────────────────────────┤
//! │  UnitController        │   TimeDateSync         │
//! ├─────────────────────────────────────────────────┤
//! │  codec: bus values <-> typed values <-> text    │
//! ├─────────────────────────────────────────────────┤
//! │  dbus: one zbus connection per operation        │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod dbus;
pub mod error;
pub mod http;
pub mod timedate;
pub mod units;

pub use config::Config;
pub use dbus::{BusConnector, BusKind, Connector};
pub use error::{Error, Result};
pub use timedate::{TimeDateSnapshot, TimeDateSync};
pub use units::{Job, JobOutcome, UnitController};
