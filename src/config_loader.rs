use crate::app_config::AppConfig;
use crate::errors::AppError;
use anyhow::{Context, Result};
use log::{debug, info};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

pub const ENV_PREFIX: &str = "CAMRTSP_";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Where the config file path came from. An explicitly named file must exist;
/// the default path may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFileOrigin {
    Explicit,
    Default,
}

/// Values collected from command line flags, keyed by section then key.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, section: &str, key: &str, value: impl Into<Value>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn put_opt<T: Into<Value>>(&mut self, section: &str, key: &str, value: Option<T>) {
        if let Some(v) = value {
            self.put(section, key, v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Resolves the effective configuration: defaults < file < environment < CLI.
///
/// `env` is the complete set of environment variables to consider; only
/// `CAMRTSP_<SECTION>__<KEY>` entries are used.
pub fn build_config<I>(
    path: Option<&Path>,
    origin: ConfigFileOrigin,
    env: I,
    cli: &CliOverrides,
) -> Result<AppConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let start_time = Instant::now();
    let defaults = serde_yaml::to_value(AppConfig::default())
        .context("Failed to serialize default configuration")?;
    let mut merged = defaults.clone();

    if let Some(path) = path {
        if let Some(file_value) = load_file(path, origin)? {
            apply_file(&mut merged, &defaults, file_value, path)?;
        }
    }

    for (name, raw) in env {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let rest = rest.to_lowercase();
        let Some((section, key)) = rest.split_once("__") else {
            debug!("Ignoring environment variable {} (expected SECTION__KEY)", name);
            continue;
        };
        let Some(default) = lookup(&defaults, section, key) else {
            debug!("Ignoring unknown environment key {}.{}", section, key);
            continue;
        };
        let value = coerce(section, key, &raw, default)?;
        debug!("Environment override {}.{} = {:?}", section, key, raw);
        set(&mut merged, section, key, value);
    }

    for (section, entries) in &cli.sections {
        for (key, value) in entries {
            if lookup(&defaults, section, key).is_none() {
                debug!("Ignoring unknown CLI key {}.{}", section, key);
                continue;
            }
            set(&mut merged, section, key, value.clone());
        }
    }

    let mut config: AppConfig = serde_yaml::from_value(merged)
        .map_err(|e| AppError::Config(format!("invalid merged configuration: {}", e)))?;
    config.rtsp.mount_path = normalize_mount_path(&config.rtsp.mount_path);

    debug!("Configuration resolved in {:?}", start_time.elapsed());
    Ok(config)
}

/// Leading slash, no trailing slash, `/stream` when nothing is left.
pub fn normalize_mount_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/stream".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn load_file(path: &Path, origin: ConfigFileOrigin) -> Result<Option<Value>> {
    if !path.exists() {
        return match origin {
            ConfigFileOrigin::Explicit => Err(AppError::Config(format!(
                "Config file not found: {}",
                path.display()
            ))
            .into()),
            ConfigFileOrigin::Default => {
                debug!("Default config file {} absent; using defaults", path.display());
                Ok(None)
            }
        };
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file '{}'", path.display()))?;
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse YAML configuration from '{}'", path.display()))?;
    info!("📄 Loaded configuration file {}", path.display());
    Ok(Some(value))
}

fn apply_file(merged: &mut Value, defaults: &Value, file_value: Value, path: &Path) -> Result<()> {
    let sections = match file_value {
        Value::Null => return Ok(()),
        Value::Mapping(m) => m,
        _ => {
            return Err(AppError::Config(format!(
                "{}: top level must be a mapping of sections",
                path.display()
            ))
            .into())
        }
    };
    for (section, entries) in sections {
        let Some(section) = section.as_str().map(str::to_lowercase) else {
            continue;
        };
        let Value::Mapping(entries) = entries else {
            debug!("Ignoring non-mapping section '{}' in {}", section, path.display());
            continue;
        };
        for (key, value) in entries {
            let Some(key) = key.as_str().map(str::to_lowercase) else {
                continue;
            };
            let Some(default) = lookup(defaults, &section, &key) else {
                debug!("Ignoring unknown key {}.{} in {}", section, key, path.display());
                continue;
            };
            let value = match value {
                Value::String(s) if !default.is_string() => coerce(&section, &key, &s, default)?,
                other => other,
            };
            set(merged, &section, &key, value);
        }
    }
    Ok(())
}

fn lookup<'a>(root: &'a Value, section: &str, key: &str) -> Option<&'a Value> {
    root.get(section)?.get(key)
}

fn set(root: &mut Value, section: &str, key: &str, value: Value) {
    if let Value::Mapping(sections) = root {
        let entry = sections
            .entry(Value::String(section.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if let Value::Mapping(entries) = entry {
            entries.insert(Value::String(key.to_string()), value);
        }
    }
}

/// Converts a string source value into the type of the key's default.
fn coerce(section: &str, key: &str, raw: &str, default: &Value) -> Result<Value> {
    let trimmed = raw.trim();
    let bad = |kind: &str| {
        AppError::Config(format!(
            "{}.{}: cannot interpret '{}' as {}",
            section, key, raw, kind
        ))
    };
    match default {
        Value::Bool(_) => match trimmed.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(bad("a boolean").into()),
        },
        Value::Number(n) if n.is_f64() => trimmed
            .parse::<f64>()
            .map(|f| Value::Number(f.into()))
            .map_err(|_| bad("a number").into()),
        Value::Number(_) => trimmed
            .parse::<u64>()
            .map(|u| Value::Number(u.into()))
            .map_err(|_| bad("an unsigned integer").into()),
        _ => Ok(Value::String(raw.to_string())),
    }
}
