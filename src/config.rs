//! Daemon configuration
//!
//! Read from an INI-style file using unit file syntax:
//!
//! ```text
//! [Network]
//! IPAddress=127.0.0.1
//! Port=8080
//!
//! [Bus]
//! Bus=system
//!
//! [Job]
//! TimeoutSec=30
//! ```
//!
//! Keys are case-insensitive; `#` and `;` start comments. When a key is
//! repeated the last value wins.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::dbus::BusKind;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostd/hostd.conf";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Keys of one section (uppercased) mapped to their value
pub type ParsedSection = HashMap<String, String>;

/// Section names (with brackets) mapped to their contents
pub type ParsedFile = HashMap<String, ParsedSection>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Section '{0}' appears more than once")]
    DuplicateSection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP server binds to
    pub listen: SocketAddr,
    pub bus: BusKind,
    /// Upper bound on waiting for a lifecycle job to finish
    pub job_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            bus: BusKind::System,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Defaults overlaid with the settings in `content`
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let parsed = parse_file(content)?;
        let mut config = Self::default();

        if let Some(network) = parsed.get("[Network]") {
            if let Some(ip) = network.get("IPADDRESS").filter(|v| !v.is_empty()) {
                let ip = ip.parse::<IpAddr>().map_err(|_| ConfigError::InvalidValue {
                    key: "IPAddress",
                    value: ip.clone(),
                })?;
                config.listen.set_ip(ip);
            }
            if let Some(port) = network.get("PORT").filter(|v| !v.is_empty()) {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "Port",
                        value: port.clone(),
                    })?;
                config.listen.set_port(port);
            }
        }

        if let Some(bus) = parsed.get("[Bus]").and_then(|s| s.get("BUS")) {
            config.bus = bus.parse::<BusKind>().map_err(|_| ConfigError::InvalidValue {
                key: "Bus",
                value: bus.clone(),
            })?;
        }

        if let Some(timeout) = parsed.get("[Job]").and_then(|s| s.get("TIMEOUTSEC")) {
            let secs = timeout
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "TimeoutSec",
                    value: timeout.clone(),
                })?;
            config.job_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Parse a config file from a string
pub fn parse_file(content: &str) -> Result<ParsedFile, ConfigError> {
    let mut sections = HashMap::new();
    let mut lines = content.lines().map(|s| s.trim()).peekable();

    // Skip lines before the first section
    while lines.peek().is_some_and(|l| !l.starts_with('[')) {
        lines.next();
    }

    let Some(first_section) = lines.next() else {
        return Ok(sections);
    };

    let mut current_name = first_section.to_string();
    let mut current_lines = Vec::new();

    for line in lines {
        if line.starts_with('[') {
            if sections.contains_key(&current_name) {
                return Err(ConfigError::DuplicateSection(current_name));
            }
            sections.insert(current_name, parse_section(&current_lines));
            current_name = line.to_string();
            current_lines.clear();
        } else {
            current_lines.push(line);
        }
    }

    if sections.contains_key(&current_name) {
        return Err(ConfigError::DuplicateSection(current_name));
    }
    sections.insert(current_name, parse_section(&current_lines));

    Ok(sections)
}

fn parse_section(lines: &[&str]) -> ParsedSection {
    let mut entries = ParsedSection::new();

    for line in lines {
        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once('=') else {
            continue;
        };

        entries.insert(name.trim().to_uppercase(), value.trim().to_string());
    }

    entries
}
