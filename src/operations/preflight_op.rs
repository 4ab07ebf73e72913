use super::op_helper::{resolve_capture, resolve_device};
use crate::app_config::AppConfig;
use crate::camera::DeviceEnumerator;
use crate::core::dependencies::check_dependencies;
use crate::core::preflight::GST_LAUNCH;
use anyhow::Result;
use log::info;

/// Runs the trial capture regardless of `camera.preflight`.
pub async fn handle_preflight_cli(config: &AppConfig) -> Result<()> {
    check_dependencies(&[(GST_LAUNCH.to_string(), "capture preflight")])?;
    let mut config = config.clone();
    config.camera.preflight = true;

    let (device, try_mjpeg) = resolve_device(&config, &DeviceEnumerator::default()).await?;
    let (format, report) = resolve_capture(&config, &device, try_mjpeg).await?;
    if let Some(report) = report {
        for (attempt, result) in &report.attempts {
            println!("{}\t{}\t{}", attempt, if result.ok { "ok" } else { "failed" }, result.reason);
        }
    }
    println!("selected\t{}\t{}", format, device.display());
    info!("✅ Preflight passed: {} capture on {}", format, device.display());
    Ok(())
}
