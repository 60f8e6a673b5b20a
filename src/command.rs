//! Shell command execution: suspend, wake-up scheduling, and pre-suspend
//! notification. Mirrors the original daemon's `execute_suspend` /
//! `notify_suspend` / `schedule_wakeup` functions.

use std::process::Command;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' exited with code 127 (not found)")]
    NotFound(String),
    #[error("failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Formats a command template's `{timestamp}`/`{iso}` placeholders the way
/// `str.format` does in the original daemon.
fn render(template: &str, at: DateTime<Utc>) -> String {
    let timestamp = at.timestamp() as f64 + at.timestamp_subsec_nanos() as f64 / 1_000_000_000.0;
    template
        .replace("{timestamp}", &timestamp.to_string())
        .replace("{iso}", &at.to_rfc3339())
}

fn run_shell(command: &str) -> Result<std::process::ExitStatus, CommandError> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })
}

/// Runs the configured suspend command. Never fails the caller: a non-zero
/// exit is logged and swallowed, matching §4.5/§7.
pub fn execute_suspend(suspend_cmd: &str, wakeup_at: Option<DateTime<Utc>>) {
    info!(command = suspend_cmd, ?wakeup_at, "suspending");
    match run_shell(suspend_cmd) {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(command = suspend_cmd, ?status, "suspend command failed"),
        Err(e) => warn!(command = suspend_cmd, error = %e, "unable to execute suspend command"),
    }
}

/// Runs the wake-up-scheduling command. Exit code 127 is promoted to an
/// error the caller must treat as a permanent configuration problem.
pub fn schedule_wakeup(command_template: &str, wakeup_at: DateTime<Utc>) -> Result<(), CommandError> {
    let command = render(command_template, wakeup_at);
    info!(command, "scheduling wakeup");
    match run_shell(&command) {
        Ok(status) if status.success() => Ok(()),
        Ok(status) if status.code() == Some(127) => Err(CommandError::NotFound(command)),
        Ok(status) => {
            warn!(command, ?status, "wakeup scheduling command failed");
            Ok(())
        }
        Err(e) => {
            warn!(command, error = %e, "unable to execute wakeup scheduling command");
            Ok(())
        }
    }
}

/// Runs the applicable pre-suspend notification command, if any is configured.
pub fn notify_suspend(
    wakeup_template: Option<&str>,
    no_wakeup_cmd: Option<&str>,
    wakeup_at: Option<DateTime<Utc>>,
) {
    let command = match (wakeup_at, wakeup_template, no_wakeup_cmd) {
        (Some(at), Some(template), _) => Some(render(template, at)),
        (None, _, Some(cmd)) => Some(cmd.to_string()),
        _ => None,
    };
    let Some(command) = command else {
        info!("no suitable notification command configured");
        return;
    };
    info!(command, "notifying before suspend");
    match run_shell(&command) {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(command, ?status, "notification command failed"),
        Err(e) => warn!(command, error = %e, "unable to execute notification command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn renders_timestamp_and_iso_placeholders() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rendered = render("wakeup --at {timestamp} --iso {iso}", at);
        assert!(rendered.contains(&at.timestamp().to_string()));
        assert!(rendered.contains(&at.to_rfc3339()));
    }

    #[test]
    fn renders_timestamp_with_fractional_seconds() {
        let at = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .with_nanosecond(500_000_000)
            .unwrap();
        let rendered = render("{timestamp}", at);
        assert_eq!(rendered, format!("{}", at.timestamp() as f64 + 0.5));
    }

    #[test]
    fn schedule_wakeup_promotes_exit_127() {
        let at = Utc::now();
        let err = schedule_wakeup("exit 127", at).unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[test]
    fn schedule_wakeup_swallows_other_nonzero_exits() {
        let at = Utc::now();
        assert!(schedule_wakeup("exit 1", at).is_ok());
    }

    #[test]
    fn notify_suspend_picks_template_by_wakeup_presence() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        notify_suspend(Some("true {timestamp}"), Some("true"), Some(at));
        notify_suspend(Some("true {timestamp}"), Some("true"), None);
        notify_suspend(None, None, None);
    }
}
