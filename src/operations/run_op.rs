use super::op_helper::{prepare_stream, render_plan, shutdown_signal};
use crate::app_config::AppConfig;
use crate::core::health_probe::{probe_rtsp, ProbeSettings};
use crate::core::metrics::StreamMetrics;
use crate::core::port_cleanup::{CleanupPolicy, ProcNetOwners};
use crate::core::status_server::start_status_endpoints;
use crate::core::supervisor::{wait_for_stop, Supervisor, SupervisorOptions};
use anyhow::{Context, Result};
use clap::ArgMatches;
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const HTTP_BIND_HOST: &str = "0.0.0.0";

pub fn supervisor_options(config: &AppConfig, skip_cleanup: bool) -> SupervisorOptions {
    let sup = &config.supervisor;
    SupervisorOptions {
        port: config.rtsp.port,
        skip_cleanup: skip_cleanup || !config.rtsp.kill_existing,
        cleanup: CleanupPolicy {
            grace: Duration::from_millis(sup.grace_ms),
            timeout: Duration::from_millis(sup.port_free_timeout_ms),
            poll_interval: Duration::from_millis(sup.poll_interval_ms),
        },
        settle: Duration::from_millis(sup.settle_ms),
        grace: Duration::from_millis(sup.grace_ms),
        poll_interval: Duration::from_millis(sup.poll_interval_ms),
        max_start_attempts: sup.max_start_attempts,
    }
}

pub async fn handle_run_cli(config: &AppConfig, args: Option<&ArgMatches>) -> Result<()> {
    let run_start_time = Instant::now();
    let flag = |name: &str| args.map(|a| a.get_flag(name)).unwrap_or(false);
    let dry_run = flag("dry-run");

    // handlers go in before anything is spawned so a signal always takes the orderly path
    let (stop_tx, stop_rx) = watch::channel(false);
    let shutdown = shutdown_signal(flag("interactive")).context("Failed to install shutdown handlers")?;
    tokio::spawn(async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    });
    let mut stop = stop_rx.clone();

    let prepared = tokio::select! {
        prepared = prepare_stream(config, !dry_run) => Some(prepared?),
        _ = wait_for_stop(&mut stop) => None,
    };
    let Some(prepared) = prepared else {
        info!("Stop requested while preparing the stream");
        return Ok(());
    };
    if flag("print-pipeline") || dry_run {
        print!("{}", render_plan(&prepared));
    }
    if dry_run {
        info!("Dry run: nothing started");
        return Ok(());
    }

    let metrics = Arc::new(StreamMetrics::new().context("Failed to register metrics")?);
    let endpoints = start_status_endpoints(
        HTTP_BIND_HOST,
        config.health.health_port,
        config.health.metrics_port,
        metrics.clone(),
    )
    .await
    .context("Failed to start health/metrics endpoints")?;

    let mut supervisor = Supervisor::new(
        supervisor_options(config, flag("skip-cleanup")),
        metrics.clone(),
        Box::new(ProcNetOwners::default()),
    )
    .with_stop(stop_rx.clone());

    let result = async {
        let cleaned = tokio::select! {
            cleaned = supervisor.clean_port() => Some(cleaned),
            _ = wait_for_stop(&mut stop) => None,
        };
        match cleaned {
            Some(cleaned) => cleaned?,
            None => {
                supervisor.stop_before_running();
                return Ok(());
            }
        }

        let Some(running) = supervisor.start(&prepared.plans).await? else {
            return Ok(());
        };
        info!(
            "📡 Streaming {} at {} (encoder {}) after {:?}",
            prepared.stream.device.display(),
            prepared.stream.rtsp_url("<host>"),
            running.plan.encoder,
            run_start_time.elapsed()
        );

        if config.health.probe && !flag("skip-health-probe") {
            let settings = ProbeSettings {
                attempts: config.health.probe_attempts,
                backoff: Duration::from_millis(config.health.probe_backoff_ms),
            };
            let probed = tokio::select! {
                report = probe_rtsp("127.0.0.1", config.rtsp.port, &config.rtsp.mount_path, settings, Some(metrics.as_ref())) => Some(report),
                _ = wait_for_stop(&mut stop) => None,
            };
            match probed {
                Some(report) if !report.is_healthy() => warn!("⚠️ Health probe inconclusive; the server keeps running"),
                Some(_) => {}
                None => return supervisor.supervise(running, async {}).await,
            }
        } else {
            debug!("Health probe skipped");
        }

        supervisor.supervise(running, wait_for_stop(&mut stop)).await
    }
    .await;

    join_all(endpoints.into_iter().map(|endpoint| endpoint.shutdown())).await;
    debug!("Supervisor states: {:?}", supervisor.history());
    result.with_context(|| format!("RTSP server on port {} failed", config.rtsp.port))?;
    info!("🏁 Run finished after {:?}", run_start_time.elapsed());
    Ok(())
}
