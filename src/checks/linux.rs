//! Probes grounded directly on Linux host state: load average, network
//! connections, running processes, ICMP reachability, and shelling out to
//! an arbitrary external command.

use std::fs;
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};

use super::{required_option, split_list, Activity, CheckError, ConfigurationError, Options, Wakeup};

/// Activity probe: compares 5-minute load average against a threshold.
pub struct Load {
    name: String,
    threshold: f64,
}

impl Load {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let threshold = options
            .get("threshold")
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|_| ConfigurationError::new("threshold must be a number"))?
            .unwrap_or(2.5);
        Ok(Box::new(Load {
            name: name.to_string(),
            threshold,
        }))
    }
}

impl Activity for Load {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        let loadavg = fs::read_to_string("/proc/loadavg")
            .map_err(|e| CheckError::temporary(format!("cannot read /proc/loadavg: {e}")))?;
        let five_min: f64 = loadavg
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| CheckError::permanent("unexpected /proc/loadavg format"))?
            .parse()
            .map_err(|_| CheckError::permanent("unexpected /proc/loadavg format"))?;
        if five_min >= self.threshold {
            Ok(Some(format!(
                "load average {five_min} >= threshold {}",
                self.threshold
            )))
        } else {
            Ok(None)
        }
    }
}

/// Activity probe: active TCP connections on configured listen ports.
pub struct ActiveConnections {
    name: String,
    ports: Vec<u16>,
}

impl ActiveConnections {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let raw = required_option(options, "ports")?;
        let ports = split_list(raw)
            .into_iter()
            .map(|p| p.parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigurationError::new("ports must be a comma-separated list of integers"))?;
        Ok(Box::new(ActiveConnections {
            name: name.to_string(),
            ports,
        }))
    }

    fn established_local_ports() -> Result<Vec<u16>, CheckError> {
        let raw = fs::read_to_string("/proc/net/tcp")
            .map_err(|e| CheckError::temporary(format!("cannot read /proc/net/tcp: {e}")))?;
        let mut ports = Vec::new();
        for line in raw.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(local) = fields.first() else { continue };
            let Some(state) = fields.get(3) else { continue };
            if *state != "01" {
                continue; // not ESTABLISHED
            }
            if let Some((_, port_hex)) = local.split_once(':') {
                if let Ok(port) = u16::from_str_radix(port_hex, 16) {
                    ports.push(port);
                }
            }
        }
        Ok(ports)
    }

    fn connection_report(&self, active: &[u16]) -> Option<String> {
        let hits: Vec<u16> = self
            .ports
            .iter()
            .copied()
            .filter(|p| active.contains(p))
            .collect();
        if hits.is_empty() {
            None
        } else {
            Some(format!("active connections on ports {hits:?}"))
        }
    }
}

impl Activity for ActiveConnections {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        let active = Self::established_local_ports()?;
        Ok(self.connection_report(&active))
    }
}

/// Activity probe: whether a process matching a name is currently running.
pub struct Processes {
    name: String,
    process_names: Vec<String>,
}

impl Processes {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let raw = required_option(options, "processes")?;
        let process_names = split_list(raw);
        if process_names.is_empty() {
            return Err(ConfigurationError::new("processes must list at least one name"));
        }
        Ok(Box::new(Processes {
            name: name.to_string(),
            process_names,
        }))
    }
}

impl Activity for Processes {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        let entries = fs::read_dir("/proc")
            .map_err(|e| CheckError::temporary(format!("cannot read /proc: {e}")))?;
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let comm_path = entry.path().join("comm");
            let Ok(comm) = fs::read_to_string(comm_path) else {
                continue;
            };
            let comm = comm.trim();
            if self.process_names.iter().any(|n| n == comm) {
                return Ok(Some(format!("process '{comm}' is running")));
            }
        }
        Ok(None)
    }
}

/// Activity probe: ICMP reachability of one or more hosts via the `ping` binary.
pub struct Ping {
    name: String,
    hosts: Vec<String>,
}

impl Ping {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let raw = required_option(options, "hosts")?;
        let hosts = split_list(raw);
        if hosts.is_empty() {
            return Err(ConfigurationError::new("hosts must list at least one host"));
        }
        Ok(Box::new(Ping {
            name: name.to_string(),
            hosts,
        }))
    }
}

impl Activity for Ping {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        for host in &self.hosts {
            let status = Command::new("ping")
                .args(["-q", "-c", "1", host])
                .status()
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CheckError::permanent("ping binary not found")
                    } else {
                        CheckError::temporary(format!("failed to execute ping: {e}"))
                    }
                })?;
            if status.success() {
                return Ok(Some(format!("host {host} is reachable")));
            }
        }
        Ok(None)
    }
}

/// Activity probe: runs an arbitrary shell command, treated as active if it exits zero.
pub struct ExternalCommandActivity {
    name: String,
    command: String,
}

impl ExternalCommandActivity {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let command = required_option(options, "command")?.to_string();
        Ok(Box::new(ExternalCommandActivity {
            name: name.to_string(),
            command,
        }))
    }
}

impl Activity for ExternalCommandActivity {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        let status = run_shell(&self.command)?;
        if status.success() {
            Ok(Some(format!("command '{}' exited zero", self.command)))
        } else {
            Ok(None)
        }
    }
}

/// Wakeup probe: reads a Unix timestamp from the first line of a file.
pub struct FileWakeup {
    name: String,
    path: String,
}

impl FileWakeup {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Wakeup>, ConfigurationError> {
        let path = required_option(options, "path")?.to_string();
        Ok(Box::new(FileWakeup {
            name: name.to_string(),
            path,
        }))
    }
}

impl Wakeup for FileWakeup {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_wakeup(&self, _now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CheckError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckError::temporary(format!("cannot read {}: {e}", self.path))),
        };
        let first_line = content.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            return Ok(None);
        }
        let timestamp: i64 = first_line
            .parse()
            .map_err(|_| CheckError::permanent(format!("invalid timestamp in {}", self.path)))?;
        Ok(Utc.timestamp_opt(timestamp, 0).single())
    }
}

/// Wakeup probe: runs a shell command that prints a Unix timestamp on stdout.
pub struct ExternalCommandWakeup {
    name: String,
    command: String,
}

impl ExternalCommandWakeup {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Wakeup>, ConfigurationError> {
        let command = required_option(options, "command")?.to_string();
        Ok(Box::new(ExternalCommandWakeup {
            name: name.to_string(),
            command,
        }))
    }
}

impl Wakeup for ExternalCommandWakeup {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_wakeup(&self, _now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CheckError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CheckError::permanent("shell not found")
                } else {
                    CheckError::temporary(format!("failed to execute command: {e}"))
                }
            })?;
        if output.status.code() == Some(127) {
            return Err(CheckError::permanent(format!("command '{}' not found", self.command)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let timestamp: i64 = trimmed
            .parse()
            .map_err(|_| CheckError::permanent(format!("command '{}' did not print a timestamp", self.command)))?;
        Ok(Utc.timestamp_opt(timestamp, 0).single())
    }
}

fn run_shell(command: &str) -> Result<std::process::ExitStatus, CheckError> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CheckError::permanent("shell not found")
            } else {
                CheckError::temporary(format!("failed to execute command: {e}"))
            }
        })
        .and_then(|status| {
            if status.code() == Some(127) {
                Err(CheckError::permanent(format!("command '{command}' not found")))
            } else {
                Ok(status)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_probe_reports_activity_above_threshold() {
        let mut opts = HashMap::new();
        opts.insert("threshold".to_string(), "0.0".to_string());
        let probe = Load::from_config("load", &opts).unwrap();
        let result = probe.evaluate().unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn load_probe_defaults_threshold_to_2_5() {
        let probe = Load::from_config("load", &HashMap::new()).unwrap();
        assert_eq!(probe.name(), "load");
    }

    #[test]
    fn ping_requires_hosts_option() {
        let err = Ping::from_config("ping", &HashMap::new()).unwrap_err();
        assert_eq!(err.0, "Missing option hosts");
    }

    #[test]
    fn file_wakeup_returns_none_for_missing_file() {
        let mut opts = HashMap::new();
        opts.insert("path".to_string(), "/nonexistent/path/to/file".to_string());
        let probe = FileWakeup::from_config("w", &opts).unwrap();
        assert!(probe.next_wakeup(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn external_command_wakeup_rejects_unknown_binary() {
        let mut opts = HashMap::new();
        opts.insert("command".to_string(), "/nonexistent-binary-xyz".to_string());
        let probe = ExternalCommandWakeup::from_config("w", &opts).unwrap();
        let result = probe.next_wakeup(Utc::now());
        assert!(matches!(result, Err(CheckError::Permanent(_))));
    }
}
