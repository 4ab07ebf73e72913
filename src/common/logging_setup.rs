use crate::app_config::LoggingSettings;
use anyhow::{Context, Result};
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Level used when `logging.gst_debug_categories` names a category without one
/// and no `gst_debug_level` is configured.
const DEFAULT_GST_CATEGORY_LEVEL: u32 = 4;

pub fn resolve_level(settings: Option<&LoggingSettings>, debug_flag: bool) -> LevelFilter {
    // Determine log level from CLI, then config, then default
    let log_level_str = if debug_flag || settings.map(|s| s.verbose).unwrap_or(false) {
        "debug".to_string()
    } else {
        settings
            .map(|s| s.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };

    match log_level_str.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        s => {
            eprintln!("Unrecognized log level '{}', defaulting to info.", s);
            LevelFilter::Info
        }
    }
}

/// Installs the global logger. Safe to call once per process; a second call
/// only reports that a logger already exists.
pub fn initialize_logging(settings: Option<&LoggingSettings>, debug_flag: bool) -> Result<()> {
    let mut builder = Builder::new();
    let level = resolve_level(settings, debug_flag);
    builder.filter_level(level);

    let log_file = settings.map(|s| s.log_file.trim()).unwrap_or("");
    if !log_file.is_empty() {
        let path = Path::new(log_file);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create log directory '{}'", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Could not open log file '{}'", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().unwrap_or_else(|e| {
        eprintln!("Failed to initialize logger: {}. Logging might not work as expected.", e);
    });
    log::info!(
        "Logging initialized (level={}, file={})",
        level,
        if log_file.is_empty() { "stderr" } else { log_file }
    );
    Ok(())
}

/// Environment handed to spawned GStreamer processes for their own debug output.
pub fn gst_debug_env(settings: &LoggingSettings) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let cats = settings.gst_debug_categories.trim();
    let level = settings.gst_debug_level;
    if !cats.is_empty() {
        let default_level = if level > 0 { level } else { DEFAULT_GST_CATEGORY_LEVEL };
        let normalized: Vec<String> = cats
            .split(',')
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .map(|seg| {
                if seg.contains(':') {
                    seg.to_string()
                } else {
                    format!("{}:{}", seg, default_level)
                }
            })
            .collect();
        env.insert("GST_DEBUG".to_string(), normalized.join(","));
    } else if level > 0 {
        env.insert("GST_DEBUG".to_string(), level.to_string());
    }
    let file = settings.gst_debug_file.trim();
    if !file.is_empty() {
        env.insert("GST_DEBUG_FILE".to_string(), file.to_string());
    }
    env
}
