use crate::app_config::AppConfig;
use crate::core::health_probe::{check_http_health, probe_rtsp, ProbeSettings};
use anyhow::Result;
use clap::ArgMatches;
use log::warn;
use std::time::Duration;

/// An inconclusive RTSP probe is reported, not treated as a failure.
pub async fn handle_probe_cli(config: &AppConfig, args: &ArgMatches) -> Result<()> {
    let host = args.get_one::<String>("host").map(String::as_str).unwrap_or("127.0.0.1");
    let settings = ProbeSettings {
        attempts: config.health.probe_attempts,
        backoff: Duration::from_millis(config.health.probe_backoff_ms),
    };
    let report = probe_rtsp(host, config.rtsp.port, &config.rtsp.mount_path, settings, None).await;
    println!("{}", serde_yaml::to_string(&report)?.trim_end());

    if config.health.health_port > 0 {
        let url = format!("http://{}:{}/health", host, config.health.health_port);
        match check_http_health(&url).await {
            Ok(true) => println!("http_health: ok ({})", url),
            Ok(false) => println!("http_health: unexpected response ({})", url),
            Err(e) => {
                warn!("HTTP health check of {} failed: {:#}", url, e);
                println!("http_health: unreachable ({})", url);
            }
        }
    }
    Ok(())
}
