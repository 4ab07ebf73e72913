use crate::camera::DeviceEnumerator;
use anyhow::{Context, Result};
use log::{info, warn};
use std::time::Instant;

/// Prints `<path>\t<name>` per device, plus capabilities when `verbose`.
pub async fn handle_list_devices_cli(verbose: bool) -> Result<()> {
    let start_time = Instant::now();
    let enumerator = DeviceEnumerator::default();
    let listed = if verbose {
        enumerator.list_devices_with_capabilities().await
    } else {
        enumerator.list_devices()
    };
    let devices = listed.context("Failed to enumerate video devices")?;

    if devices.is_empty() {
        warn!("⚠️ No video devices found");
    }
    for device in &devices {
        println!("{}\t{}", device.path.display(), device.name);
        if verbose && !device.capabilities.is_empty() {
            println!("\t{}", device.capabilities.summary());
        }
    }
    info!("🔎 Listed {} device(s) in {:?}", devices.len(), start_time.elapsed());
    Ok(())
}
