//! A daemon that suspends a host to RAM when it is idle and schedules the
//! next wake-up.
//!
//! ```text
//!                +------------------+
//!                |     Scheduler    |
//!                | (tokio event loop)|
//!                +----+--------+----+
//!                     |        |
//!            tick     |        | PrepareForSleep / resumed
//!                     v        v
//!                +------------------+
//!                |  Decision engine |
//!                +--+------------+--+
//!                   |            |
//!         activity probes   wakeup probes
//!                   |            |
//!                   v            v
//!             load, ping,   file, calendar,
//!             processes...  external_command
//! ```

pub mod checks;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod scheduler;

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

use checks::{Activity, ActivityRegistry, RegistryError, Wakeup, WakeupRegistry};
use clock::{Clock, SystemClock};
use config::Config;
use engine::{Engine, EngineConfig, InhibitLock};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("check '{name}': {source}")]
    CheckSetup {
        name: String,
        #[source]
        source: RegistryError,
    },
    #[error("no enabled activity checks configured")]
    NoActivityChecks,
}

/// Builds the engine from a loaded configuration, wiring up every enabled
/// activity/wakeup check through the static registry (§4.1).
pub fn build_engine(
    config: &Config,
    inhibit: Box<dyn InhibitLock>,
    clock: Arc<dyn Clock>,
    evaluate_all: bool,
) -> Result<Engine, StartupError> {
    let mut activities: Vec<Box<dyn Activity>> = Vec::new();
    for spec in &config.activity_checks {
        if !spec.enabled {
            continue;
        }
        let probe = ActivityRegistry::build(&spec.name, &spec.class, &spec.options).map_err(|source| {
            StartupError::CheckSetup {
                name: spec.name.clone(),
                source,
            }
        })?;
        activities.push(probe);
    }
    if activities.is_empty() {
        return Err(StartupError::NoActivityChecks);
    }

    let mut wakeups: Vec<Box<dyn Wakeup>> = Vec::new();
    for spec in &config.wakeup_checks {
        if !spec.enabled {
            continue;
        }
        let probe = WakeupRegistry::build(&spec.name, &spec.class, &spec.options).map_err(|source| {
            StartupError::CheckSetup {
                name: spec.name.clone(),
                source,
            }
        })?;
        wakeups.push(probe);
    }

    let engine_config = EngineConfig {
        idle_threshold: Duration::seconds(config.general.idle_time as i64),
        min_sleep_duration: Duration::seconds(config.general.min_sleep_time as i64),
        wakeup_safety_margin: Duration::seconds(config.general.wakeup_delta as i64),
        evaluate_all,
        suspend_cmd: config.general.suspend_cmd.clone(),
        wakeup_cmd: config.general.wakeup_cmd.clone(),
        notify_cmd_wakeup: config.general.notify_cmd_wakeup.clone(),
        notify_cmd_no_wakeup: config.general.notify_cmd_no_wakeup.clone(),
    };

    Ok(Engine::new(clock, activities, wakeups, inhibit, engine_config))
}

/// The production clock: real wall-clock time.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// The production inhibit-lock source: queries systemd-logind over D-Bus.
pub fn default_inhibit_lock() -> Box<dyn InhibitLock> {
    Box::new(checks::systemd::LogindInhibitLock)
}
