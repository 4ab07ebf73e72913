use crate::app_config::{AppConfig, Backend, CodecMode};
use crate::camera::capabilities::probe_capabilities;
use crate::camera::DeviceEnumerator;
use crate::common::logging_setup::gst_debug_env;
use crate::core::dependencies::{check_dependencies, required_binaries};
use crate::core::encoder_probe::{catalog_binary, catalog_for, select_encoder_chain, HardwarePriority};
use crate::core::pipeline_builder::{build_launch_plan, CaptureFormat, LaunchPlan};
use crate::core::preflight::{run_preflight, GstLaunchTrial, PreflightReport};
use crate::core::stream_config::StreamConfig;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;

/// Resolved stream plus one launch plan per encoder in its chain.
pub struct PreparedStream {
    pub stream: StreamConfig,
    pub plans: Vec<LaunchPlan>,
    pub preflight: Option<PreflightReport>,
}

impl PreparedStream {
    pub fn selected_plan(&self) -> Option<&LaunchPlan> {
        self.plans.first()
    }
}

/// Whether the camera should be asked for MJPEG first.
pub fn wants_mjpeg(config: &AppConfig) -> bool {
    config.encoding.codec == CodecMode::Mjpeg || !config.camera.prefer_raw
}

/// Picks the device and warns when the requested mode is not advertised.
pub async fn resolve_device(config: &AppConfig, enumerator: &DeviceEnumerator) -> Result<(PathBuf, bool)> {
    let device = enumerator
        .select_device(&config.camera.device)
        .context("Failed to resolve camera device")?;
    let caps = probe_capabilities(&device).await;
    let mut try_mjpeg = wants_mjpeg(config);
    if !caps.is_empty() {
        debug!("Capabilities of {}: {}", device.display(), caps.summary());
        let (w, h) = (config.camera.width, config.camera.height);
        if w > 0 && h > 0 && !caps.supports_resolution(w, h) {
            warn!("⚠️ {} does not advertise {}x{}; the driver may pick another size", device.display(), w, h);
        }
        if try_mjpeg && !caps.supports_mjpeg() && config.encoding.codec != CodecMode::Mjpeg {
            info!("{} advertises no MJPEG; capturing raw", device.display());
            try_mjpeg = false;
        }
    }
    Ok((device, try_mjpeg))
}

/// Runs the trial capture when enabled and returns the capture format to use.
pub async fn resolve_capture(
    config: &AppConfig,
    device: &Path,
    try_mjpeg: bool,
) -> Result<(CaptureFormat, Option<PreflightReport>)> {
    if !config.camera.preflight {
        let format = if try_mjpeg { CaptureFormat::Mjpeg } else { CaptureFormat::Raw };
        debug!("Preflight disabled; assuming {} capture", format);
        return Ok((format, None));
    }
    let trial = GstLaunchTrial { timeout: Duration::from_secs(config.camera.preflight_timeout_secs) };
    let (report, result) = run_preflight(
        &trial,
        device,
        try_mjpeg,
        config.camera.width,
        config.camera.height,
        config.camera.framerate,
    )
    .await;
    let format = result.context("Camera preflight failed")?;
    Ok((format, Some(report)))
}

/// Device → capture format → encoder chain → stream config → launch plans.
/// `require_server` also checks the server binaries, not just the encoder catalog.
pub async fn prepare_stream(config: &AppConfig, require_server: bool) -> Result<PreparedStream> {
    let start_time = Instant::now();
    let backend = config.rtsp.backend;
    if require_server {
        check_dependencies(&required_binaries(config, config.camera.preflight))?;
    } else {
        check_dependencies(&[(catalog_binary(backend).to_string(), "encoder discovery")])?;
    }

    let enumerator = DeviceEnumerator::default();
    let (device, try_mjpeg) = resolve_device(config, &enumerator).await?;
    let (capture, preflight) = resolve_capture(config, &device, try_mjpeg).await?;

    let priority = HardwarePriority::parse(&config.encoding.hardware_priority);
    let catalog = catalog_for(backend);
    let chain = select_encoder_chain(config.encoding.codec, &priority, backend, catalog.as_ref()).await?;
    let stream = StreamConfig::resolve(config, device, capture, chain)?;

    let media_env = match backend {
        Backend::Gstreamer => gst_debug_env(&config.logging),
        Backend::Mediamtx => BTreeMap::new(),
    };
    let runtime_dir = PathBuf::from(&config.rtsp.runtime_dir);
    let plans = stream
        .encoder_chain
        .iter()
        .map(|encoder| build_launch_plan(&stream, encoder, &config.rtsp.server_binary, &runtime_dir, &media_env))
        .collect::<Result<Vec<_>>>()
        .context("Failed to build launch plans")?;

    info!(
        "🧩 Stream prepared in {:?}: {} {} capture, {} kbps, encoder {}",
        start_time.elapsed(),
        stream.device.display(),
        stream.capture,
        stream.bitrate_kbps,
        stream.selected_encoder()
    );
    Ok(PreparedStream { stream, plans, preflight })
}

/// Text shown by `print-pipeline` and `run --print-pipeline`.
pub fn render_plan(prepared: &PreparedStream) -> String {
    let mut out = String::new();
    if let Some(plan) = prepared.selected_plan() {
        out.push_str(&plan.description);
        out.push('\n');
        if !plan.server.env.is_empty() {
            for (k, v) in &plan.server.env {
                out.push_str(&format!("# env {}={}\n", k, v));
            }
        }
        let fallbacks: Vec<String> = prepared.plans.iter().skip(1).map(|p| p.encoder.to_string()).collect();
        if !fallbacks.is_empty() {
            out.push_str(&format!("# fallbacks: {}\n", fallbacks.join(", ")));
        }
    }
    out
}

/// Reads `input` on its own thread. The receiver resolves on a `q` or `quit`
/// line and errors once the input closes. The thread never blocks runtime shutdown.
pub fn spawn_quit_reader<R: BufRead + Send + 'static>(input: R) -> Result<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("stdin-quit".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                let command = line.trim().to_lowercase();
                if command == "q" || command == "quit" {
                    let _ = tx.send(());
                    return;
                }
            }
        })
        .context("Failed to start stdin reader thread")?;
    Ok(rx)
}

/// Installs the SIGINT and SIGTERM handlers (and, when `interactive`, the
/// stdin reader) right away. The returned future resolves on the first of them.
pub fn shutdown_signal(interactive: bool) -> Result<impl Future<Output = ()>> {
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let quit_rx = if interactive {
        info!("⌨️ Enter 'q' to stop");
        Some(spawn_quit_reader(std::io::BufReader::new(std::io::stdin()))?)
    } else {
        None
    };

    Ok(async move {
        let quit = async move {
            if let Some(rx) = quit_rx {
                if rx.await.is_ok() {
                    return;
                }
            }
            // stdin closed: keep running until a signal arrives
            std::future::pending::<()>().await
        };
        tokio::select! {
            _ = sigint.recv() => info!("🛑 Interrupt received"),
            _ = sigterm.recv() => info!("🛑 SIGTERM received"),
            _ = quit => info!("🛑 Quit requested"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjpeg_first_unless_raw_preferred() {
        let mut config = AppConfig::default();
        assert!(wants_mjpeg(&config));
        config.encoding.codec = CodecMode::H264;
        assert!(wants_mjpeg(&config));
        config.camera.prefer_raw = true;
        assert!(!wants_mjpeg(&config));
        config.encoding.codec = CodecMode::Mjpeg;
        assert!(wants_mjpeg(&config));
    }

    #[tokio::test]
    async fn quit_line_resolves_reader() {
        let rx = spawn_quit_reader(std::io::Cursor::new("status\n  Quit \n")).unwrap();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn closed_input_without_quit_errors() {
        let rx = spawn_quit_reader(std::io::Cursor::new("status\n")).unwrap();
        assert!(rx.await.is_err());
    }

    struct NeverReady;

    impl std::io::Read for NeverReady {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[test]
    fn blocked_stdin_does_not_delay_runtime_drop() {
        let started = Instant::now();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let rx = spawn_quit_reader(std::io::BufReader::new(NeverReady)).unwrap();
            assert!(tokio::time::timeout(Duration::from_millis(100), rx).await.is_err());
        });
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
