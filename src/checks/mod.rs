//! Probe contract: the uniform interface every activity or wakeup check implements.

pub mod calendar;
pub mod linux;
pub mod registry;
pub mod systemd;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use registry::{ActivityRegistry, RegistryError, WakeupRegistry};

/// Raw configuration options for a single probe instance, as parsed from its
/// `[check.<name>]` or `[wakeup.<name>]` section.
pub type Options = HashMap<String, String>;

/// Failure taxonomy shared by activity and wakeup probes.
///
/// Temporary failures are expected to self-heal and are treated as an
/// abstaining "idle"/"no wakeup" result by the engine. Permanent failures
/// indicate a structural problem; the probe is expected to keep surfacing
/// them until reconfigured.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{0}")]
    Temporary(String),
    #[error("{0}")]
    Permanent(String),
}

impl CheckError {
    pub fn temporary(detail: impl Into<String>) -> Self {
        CheckError::Temporary(detail.into())
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        CheckError::Permanent(detail.into())
    }
}

/// Raised while building a probe instance from configuration. Always fatal
/// to daemon startup.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigurationError(pub String);

impl ConfigurationError {
    pub fn new(detail: impl Into<String>) -> Self {
        ConfigurationError(detail.into())
    }
}

/// A check that observes whether the system is currently busy.
///
/// Implementations must return within a bounded time (see each probe's own
/// timeout) and must not mutate engine state; they may keep their own
/// internal sampling state.
pub trait Activity: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Some(reason)` if the probe observed activity that should
    /// prevent suspension, `None` if it observed none.
    fn evaluate(&self) -> Result<Option<String>, CheckError>;
}

/// A check that reports when, if ever, the system needs to be running next.
pub trait Wakeup: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the next instant the system must be awake, or `None` if this
    /// probe has no opinion right now. The engine discards any instant that
    /// is not strictly later than `now`.
    fn next_wakeup(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CheckError>;
}

impl fmt::Debug for dyn Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activity({})", self.name())
    }
}

impl fmt::Debug for dyn Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wakeup({})", self.name())
    }
}

/// Parses a comma-separated option value into a trimmed, non-empty list.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub(crate) fn required_option<'a>(
    options: &'a Options,
    key: &str,
) -> Result<&'a str, ConfigurationError> {
    options
        .get(key)
        .map(|v| v.as_str())
        .ok_or_else(|| ConfigurationError::new(format!("Missing option {key}")))
}
