use crate::camera::capabilities::{self, CaptureCapabilities};
use crate::errors::AppError;
use log::{debug, info};
use nix::unistd::{access, AccessFlags};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const AUTO_DEVICE: &str = "auto";

/// A capture device discovered at startup. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CameraDevice {
    pub path: PathBuf,
    pub name: String,
    pub capabilities: CaptureCapabilities,
}

/// Scans a device directory for `video<N>` nodes.
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    dev_dir: PathBuf,
    sysfs_dir: PathBuf,
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new("/dev", "/sys/class/video4linux")
    }
}

impl DeviceEnumerator {
    pub fn new(dev_dir: impl Into<PathBuf>, sysfs_dir: impl Into<PathBuf>) -> Self {
        DeviceEnumerator {
            dev_dir: dev_dir.into(),
            sysfs_dir: sysfs_dir.into(),
        }
    }

    /// Candidate device paths in lexical order.
    pub fn candidate_paths(&self) -> Result<Vec<PathBuf>, AppError> {
        let entries = fs::read_dir(&self.dev_dir).map_err(|e| {
            AppError::Io(format!("Failed to read {}: {}", self.dev_dir.display(), e))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(is_video_node_name)
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        debug!("Found {} candidate video nodes in {}", paths.len(), self.dev_dir.display());
        Ok(paths)
    }

    /// Human-readable name from sysfs; empty when unavailable.
    pub fn display_name(&self, path: &Path) -> String {
        path.file_name()
            .map(|node| self.sysfs_dir.join(node).join("name"))
            .and_then(|name_file| fs::read_to_string(name_file).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Lists devices without touching them beyond reading sysfs.
    pub fn list_devices(&self) -> Result<Vec<CameraDevice>, AppError> {
        Ok(self
            .candidate_paths()?
            .into_iter()
            .map(|path| CameraDevice {
                name: self.display_name(&path),
                path,
                capabilities: CaptureCapabilities::default(),
            })
            .collect())
    }

    /// Like `list_devices`, but also asks each device for its capture formats.
    pub async fn list_devices_with_capabilities(&self) -> Result<Vec<CameraDevice>, AppError> {
        let mut devices = self.list_devices()?;
        for device in devices.iter_mut() {
            device.capabilities = capabilities::probe_capabilities(&device.path).await;
        }
        Ok(devices)
    }

    /// Resolves the configured device: an explicit path must exist, `auto`
    /// picks the lexically-first readable candidate.
    pub fn select_device(&self, requested: &str) -> Result<PathBuf, AppError> {
        let start_time = Instant::now();
        let requested = requested.trim();
        if !requested.is_empty() && !requested.eq_ignore_ascii_case(AUTO_DEVICE) {
            let path = PathBuf::from(requested);
            if !path.exists() {
                return Err(AppError::DeviceNotFound(requested.to_string()));
            }
            debug!("Using configured camera {}", path.display());
            return Ok(path);
        }
        let chosen = self
            .candidate_paths()?
            .into_iter()
            .find(|path| access(path.as_path(), AccessFlags::R_OK).is_ok())
            .ok_or_else(|| {
                AppError::DeviceNotFound(format!("no readable video devices in {}", self.dev_dir.display()))
            })?;
        info!("📷 Auto-selected camera: {} (in {:?})", chosen.display(), start_time.elapsed());
        Ok(chosen)
    }
}

fn is_video_node_name(name: &str) -> bool {
    name.strip_prefix("video")
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
