use crate::core::pipeline_builder::{capture_caps, CaptureFormat};
use crate::errors::AppError;
use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

pub const GST_LAUNCH: &str = "gst-launch-1.0";
const TRIAL_BUFFERS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialResult {
    pub ok: bool,
    pub reason: String,
}

/// Short bounded capture against the camera.
#[async_trait]
pub trait CaptureTrial: Send + Sync {
    async fn trial(&self, device: &Path, format: CaptureFormat, width: u32, height: u32, framerate: u32) -> TrialResult;
}

/// Runs `gst-launch-1.0 v4l2src ... ! fakesink` with a timeout. A trial that is
/// still running at the deadline is treated as healthy.
pub struct GstLaunchTrial {
    pub timeout: Duration,
}

#[async_trait]
impl CaptureTrial for GstLaunchTrial {
    async fn trial(&self, device: &Path, format: CaptureFormat, width: u32, height: u32, framerate: u32) -> TrialResult {
        let caps = capture_caps(format, width, height, framerate);
        let source = format!("device={}", device.display());
        let buffers = format!("num-buffers={}", TRIAL_BUFFERS);
        info!("Preflight: v4l2src {} ! {} ! fakesink sync=false", source, caps);

        let child = Command::new(GST_LAUNCH)
            .args(["-q", "v4l2src", &source, &buffers, "!", &caps, "!", "fakesink", "sync=false"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return TrialResult { ok: false, reason: format!("spawn_failed:{}", e) },
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) if out.status.success() => TrialResult { ok: true, reason: "eos".to_string() },
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
                TrialResult { ok: false, reason: format!("error:{} ({})", detail, out.status) }
            }
            Ok(Err(e)) => TrialResult { ok: false, reason: format!("wait_failed:{}", e) },
            // dropping the wait future kills the trial process
            Err(_) => TrialResult { ok: true, reason: "assumed_ok".to_string() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub device: String,
    pub format: Option<CaptureFormat>,
    pub attempts: Vec<(CaptureFormat, TrialResult)>,
}

/// MJPEG first when `try_mjpeg`, then raw. Returns the first capture format
/// that worked, or `PreflightFailed` once both are exhausted.
pub async fn run_preflight(
    trial: &dyn CaptureTrial,
    device: &Path,
    try_mjpeg: bool,
    width: u32,
    height: u32,
    framerate: u32,
) -> (PreflightReport, Result<CaptureFormat, AppError>) {
    let start_time = Instant::now();
    let order: &[CaptureFormat] = if try_mjpeg {
        &[CaptureFormat::Mjpeg, CaptureFormat::Raw]
    } else {
        &[CaptureFormat::Raw]
    };
    let mut report = PreflightReport {
        device: device.display().to_string(),
        format: None,
        attempts: Vec::new(),
    };
    for format in order {
        let result = trial.trial(device, *format, width, height, framerate).await;
        let ok = result.ok;
        if ok {
            info!("✅ Preflight {} ok ({}) in {:?}", format, result.reason, start_time.elapsed());
        } else if *format == CaptureFormat::Mjpeg {
            warn!("MJPEG preflight failed ({}); retrying raw capture fallback", result.reason);
        } else {
            error!("Preflight {} failed ({})", format, result.reason);
        }
        report.attempts.push((*format, result));
        if ok {
            report.format = Some(*format);
            return (report, Ok(*format));
        }
    }
    let reason = report
        .attempts
        .iter()
        .map(|(f, r)| format!("{}: {}", f, r.reason))
        .collect::<Vec<_>>()
        .join("; ");
    let err = AppError::PreflightFailed { device: report.device.clone(), reason };
    (report, Err(err))
}
