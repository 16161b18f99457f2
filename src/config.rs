use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::MINUTE_MS;
use crate::policy::{SchedulingPolicy, WorkHours};

#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Server settings, read once at start.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub people_file: Option<PathBuf>,
    pub policy: SchedulingPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let snap_minutes: i64 = parse(&lookup, "MEETSLOT_SNAP_MINUTES", 30)?;
        if snap_minutes <= 0 {
            return Err(ConfigError {
                key: "MEETSLOT_SNAP_MINUTES",
                value: snap_minutes.to_string(),
                reason: "must be positive",
            });
        }
        let snap_ms = snap_minutes.checked_mul(MINUTE_MS).ok_or(ConfigError {
            key: "MEETSLOT_SNAP_MINUTES",
            value: snap_minutes.to_string(),
            reason: "too large",
        })?;
        let poll_seconds: u64 = parse(&lookup, "MEETSLOT_POLL_SECONDS", 15)?;
        if poll_seconds == 0 {
            return Err(ConfigError {
                key: "MEETSLOT_POLL_SECONDS",
                value: "0".into(),
                reason: "must be positive",
            });
        }

        Ok(Self {
            bind: get("MEETSLOT_BIND", "0.0.0.0"),
            port: parse(&lookup, "MEETSLOT_PORT", 5433)?,
            data_dir: PathBuf::from(get("MEETSLOT_DATA_DIR", "./data")),
            password: get("MEETSLOT_PASSWORD", "meetslot"),
            max_connections: parse(&lookup, "MEETSLOT_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse(&lookup, "MEETSLOT_COMPACT_THRESHOLD", 1000)?,
            tls_cert: lookup("MEETSLOT_TLS_CERT"),
            tls_key: lookup("MEETSLOT_TLS_KEY"),
            metrics_port: lookup("MEETSLOT_METRICS_PORT")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError {
                        key: "MEETSLOT_METRICS_PORT",
                        value: v,
                        reason: "not a port number",
                    })
                })
                .transpose()?,
            people_file: lookup("MEETSLOT_PEOPLE_FILE").map(PathBuf::from),
            policy: SchedulingPolicy {
                admin_hours: hours(&lookup, "MEETSLOT_ADMIN_HOURS", "08:00-17:00")?,
                coach_hours: hours(&lookup, "MEETSLOT_COACH_HOURS", "08:00-15:00")?,
                snap_ms,
                poll_interval: Duration::from_secs(poll_seconds),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("meetslot.wal")
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            key,
            value,
            reason: "not a valid number",
        }),
    }
}

fn hours(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<WorkHours, ConfigError> {
    let value = lookup(key).unwrap_or_else(|| default.to_string());
    WorkHours::parse(&value).ok_or(ConfigError {
        key,
        value,
        reason: "expected HH:MM-HH:MM with start before end",
    })
}
