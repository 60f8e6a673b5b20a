//! Configuration file parsing and the JSON configuration schema.

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checks::Options;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::ParseError,
    },
    #[error("missing required option '{0}' in [general]")]
    MissingGeneral(&'static str),
    #[error("option '{key}' in [general] must be a valid {kind}: {value}")]
    InvalidGeneral {
        key: &'static str,
        kind: &'static str,
        value: String,
    },
    #[error("interpolation reference ${{{0}}} could not be resolved")]
    UnresolvedInterpolation(String),
}

/// The validated `[general]` section.
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub interval: u64,
    pub idle_time: u64,
    pub min_sleep_time: u64,
    pub wakeup_delta: u64,
    pub suspend_cmd: String,
    pub wakeup_cmd: Option<String>,
    pub notify_cmd_wakeup: Option<String>,
    pub notify_cmd_no_wakeup: Option<String>,
}

/// One parsed `[check.<name>]` or `[wakeup.<name>]` section.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub class: String,
    pub enabled: bool,
    pub options: Options,
}

/// Everything read from the configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub activity_checks: Vec<CheckSpec>,
    pub wakeup_checks: Vec<CheckSpec>,
}

const ACTIVITY_PREFIX: &str = "check";
const WAKEUP_PREFIX: &str = "wakeup";

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let ini = interpolate(ini)?;

        let general = parse_general(&ini)?;

        let mut activity_checks = Vec::new();
        let mut wakeup_checks = Vec::new();
        for (section_name, section) in ini.iter().filter_map(|(name, props)| name.map(|n| (n, props))) {
            if let Some(spec) = parse_check_section(section_name, section, ACTIVITY_PREFIX) {
                activity_checks.push(spec);
            } else if let Some(spec) = parse_check_section(section_name, section, WAKEUP_PREFIX) {
                wakeup_checks.push(spec);
            }
        }

        Ok(Config {
            general,
            activity_checks,
            wakeup_checks,
        })
    }
}

fn parse_check_section(
    section_name: &str,
    section: &ini::Properties,
    prefix: &str,
) -> Option<CheckSpec> {
    let name = section_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let enabled = section
        .get("enabled")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);
    let class = section
        .get("class")
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string());
    let options: Options = section
        .iter()
        .filter(|(k, _)| *k != "enabled" && *k != "class")
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Some(CheckSpec {
        name: name.to_string(),
        class,
        enabled,
        options,
    })
}

fn parse_general(ini: &Ini) -> Result<GeneralConfig, ConfigError> {
    let section = ini.section(Some("general"));

    let get = |key: &'static str| -> Option<&str> { section.and_then(|s| s.get(key)) };
    let get_u64 = |key: &'static str, default: Option<u64>| -> Result<u64, ConfigError> {
        match get(key) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidGeneral {
                    key,
                    kind: "integer",
                    value: v.to_string(),
                }),
            None => default.ok_or(ConfigError::MissingGeneral(key)),
        }
    };

    Ok(GeneralConfig {
        interval: get_u64("interval", None)?,
        idle_time: get_u64("idle_time", Some(300))?,
        min_sleep_time: get_u64("min_sleep_time", Some(1200))?,
        wakeup_delta: get_u64("wakeup_delta", Some(30))?,
        suspend_cmd: get("suspend_cmd")
            .ok_or(ConfigError::MissingGeneral("suspend_cmd"))?
            .to_string(),
        wakeup_cmd: get("wakeup_cmd").map(str::to_string),
        notify_cmd_wakeup: get("notify_cmd_wakeup").map(str::to_string),
        notify_cmd_no_wakeup: get("notify_cmd_no_wakeup").map(str::to_string),
    })
}

/// Resolves `${section:key}` references with a single substitution pass.
///
/// This mirrors Python's `configparser.ExtendedInterpolation` for the
/// non-recursive case, which covers every configuration in this daemon's
/// test corpus. A reference to a section/key that does not exist, or that
/// is itself unresolved after one pass (i.e. a cycle), is a configuration
/// error.
fn interpolate(ini: Ini) -> Result<Ini, ConfigError> {
    let snapshot: HashMap<(Option<String>, String), String> = ini
        .iter()
        .flat_map(|(section, props)| {
            props
                .iter()
                .map(move |(k, v)| ((section.map(str::to_string), k.to_string()), v.to_string()))
        })
        .collect();

    let mut resolved = Ini::new();
    for (section, props) in ini.iter() {
        for (key, value) in props.iter() {
            let new_value = substitute(value, &snapshot)?;
            resolved.with_section(section).set(key.to_string(), new_value);
        }
    }
    Ok(resolved)
}

fn substitute(
    value: &str,
    snapshot: &HashMap<(Option<String>, String), String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::UnresolvedInterpolation(value.to_string()))?;
        let reference = &after[..end];
        let (section, key) = reference
            .split_once(':')
            .ok_or_else(|| ConfigError::UnresolvedInterpolation(reference.to_string()))?;
        let lookup = (Some(section.to_string()), key.to_string());
        let resolved = snapshot
            .get(&lookup)
            .ok_or_else(|| ConfigError::UnresolvedInterpolation(reference.to_string()))?;
        if resolved.contains("${") {
            return Err(ConfigError::UnresolvedInterpolation(reference.to_string()));
        }
        out.push_str(resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// --- JSON configuration schema -------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    #[serde(rename = "array")]
    StringList,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterSchema {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: Option<ParameterType>,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<&'static str>>,
}

impl ParameterSchema {
    pub fn new(name: &'static str, kind: ParameterType, description: &'static str) -> Self {
        Self {
            name,
            kind: Some(kind),
            description,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn minimum(mut self, value: f64) -> Self {
        self.minimum = Some(value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ConfigSchema {
    pub general_parameters: Vec<ParameterSchema>,
    pub activity_checks: HashMap<&'static str, Vec<ParameterSchema>>,
    pub wakeup_checks: HashMap<&'static str, Vec<ParameterSchema>>,
}

impl ConfigSchema {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub fn general_parameters() -> Vec<ParameterSchema> {
    vec![
        ParameterSchema::new(
            "interval",
            ParameterType::Integer,
            "The time to wait after executing all checks in seconds.",
        )
        .required()
        .minimum(1.0),
        ParameterSchema::new(
            "idle_time",
            ParameterType::Integer,
            "The required amount of time in seconds with no detected activity before the host will be suspended.",
        )
        .default_value(300)
        .minimum(1.0),
        ParameterSchema::new(
            "min_sleep_time",
            ParameterType::Integer,
            "The minimal amount of time in seconds the system has to sleep for actually triggering suspension.",
        )
        .default_value(1200)
        .minimum(0.0),
        ParameterSchema::new(
            "wakeup_delta",
            ParameterType::Integer,
            "Wake up the system this amount of seconds earlier than the determined wake up time.",
        )
        .default_value(30)
        .minimum(0.0),
        ParameterSchema::new(
            "suspend_cmd",
            ParameterType::String,
            "The command to execute in case the host shall be suspended.",
        )
        .required(),
        ParameterSchema::new(
            "wakeup_cmd",
            ParameterType::String,
            "The command template to schedule a wake up of the system. Supports 'timestamp' and 'iso' substitutions.",
        ),
        ParameterSchema::new(
            "notify_cmd_wakeup",
            ParameterType::String,
            "A command to notify interested clients before suspending, called only if a wake up is scheduled.",
        ),
        ParameterSchema::new(
            "notify_cmd_no_wakeup",
            ParameterType::String,
            "A command to notify interested clients before suspending, called only if no wake up is scheduled.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_general_section_with_defaults() {
        let raw = "[general]\ninterval = 30\nsuspend_cmd = systemctl suspend\n";
        let config = Config::parse(raw, Path::new("test.conf")).unwrap();
        assert_eq!(config.general.interval, 30);
        assert_eq!(config.general.idle_time, 300);
        assert_eq!(config.general.suspend_cmd, "systemctl suspend");
    }

    #[test]
    fn rejects_missing_required_option() {
        let raw = "[general]\nidle_time = 30\n";
        let err = Config::parse(raw, Path::new("test.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingGeneral("interval")));
    }

    #[test]
    fn parses_check_sections() {
        let raw = "\
[general]
interval = 10
suspend_cmd = true

[check.load]
enabled = true
class = load
threshold = 1.5

[wakeup.timer]
enabled = true
path = /tmp/wakeup
";
        let config = Config::parse(raw, Path::new("test.conf")).unwrap();
        assert_eq!(config.activity_checks.len(), 1);
        assert_eq!(config.activity_checks[0].name, "load");
        assert_eq!(
            config.activity_checks[0].options.get("threshold").unwrap(),
            "1.5"
        );
        assert_eq!(config.wakeup_checks.len(), 1);
        assert_eq!(config.wakeup_checks[0].class, "timer");
    }

    #[test]
    fn skips_disabled_checks_but_still_parses_them() {
        let raw = "\
[general]
interval = 10
suspend_cmd = true

[check.load]
enabled = false
";
        let config = Config::parse(raw, Path::new("test.conf")).unwrap();
        assert_eq!(config.activity_checks.len(), 1);
        assert!(!config.activity_checks[0].enabled);
    }

    #[test]
    fn resolves_extended_interpolation() {
        let raw = "\
[general]
interval = 10
suspend_cmd = true

[check.ping]
hosts = ${general:gateway}
";
        let err = Config::parse(raw, Path::new("test.conf"));
        assert!(err.is_err());

        let raw_ok = "\
[general]
interval = 10
suspend_cmd = true
gateway = 10.0.0.1

[check.ping]
hosts = ${general:gateway}
";
        let config = Config::parse(raw_ok, Path::new("test.conf")).unwrap();
        assert_eq!(
            config.activity_checks[0].options.get("hosts").unwrap(),
            "10.0.0.1"
        );
    }
}
