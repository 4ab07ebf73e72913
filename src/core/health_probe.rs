use crate::core::metrics::StreamMetrics;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ProbeOutcome {
    /// Connection accepted and an RTSP status line came back.
    Healthy { status_line: String },
    /// Retries exhausted. Never fatal.
    Inconclusive { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub target: String,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Healthy { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub backoff: Duration,
}

pub fn options_request(url: &str, cseq: u32) -> String {
    format!(
        "OPTIONS {} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: cam-rtsp/{}\r\n\r\n",
        url,
        cseq,
        env!("CARGO_PKG_VERSION")
    )
}

async fn probe_once(host: &str, port: u16, url: &str, cseq: u32, metrics: Option<&StreamMetrics>) -> Result<String, String> {
    let connect = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect((host, port)));
    let mut stream = match connect.await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(format!("connect: {}", e)),
        Err(_) => return Err("connect: timed out".to_string()),
    };
    if let Some(m) = metrics {
        m.record_probe_connection();
    }

    let request = options_request(url, cseq);
    match tokio::time::timeout(IO_TIMEOUT, stream.write_all(request.as_bytes())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("write: {}", e)),
        Err(_) => return Err("write: timed out".to_string()),
    }

    let mut buf = vec![0u8; 1024];
    let n = match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(0)) => return Err("connection closed without response".to_string()),
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(format!("read: {}", e)),
        Err(_) => return Err("read: timed out".to_string()),
    };
    let response = String::from_utf8_lossy(&buf[..n]);
    let status_line = response.lines().next().unwrap_or("").trim().to_string();
    if !status_line.starts_with("RTSP/") {
        return Err(format!("unexpected response '{}'", status_line));
    }
    if let Some(m) = metrics {
        m.record_probe_session();
    }
    Ok(status_line)
}

/// Sends RTSP OPTIONS to `host:port` with bounded retries and linear backoff.
pub async fn probe_rtsp(
    host: &str,
    port: u16,
    mount_path: &str,
    settings: ProbeSettings,
    metrics: Option<&StreamMetrics>,
) -> ProbeReport {
    let start_time = Instant::now();
    let url = format!("rtsp://{}:{}{}", host, port, mount_path);
    let attempts = settings.attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match probe_once(host, port, &url, attempt, metrics).await {
            Ok(status_line) => {
                info!("✅ RTSP probe {} answered '{}' (attempt {}, {:?})", url, status_line, attempt, start_time.elapsed());
                return ProbeReport { target: url, attempts: attempt, checked_at: Utc::now(), outcome: ProbeOutcome::Healthy { status_line } };
            }
            Err(e) => {
                debug!("RTSP probe attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(settings.backoff * attempt).await;
        }
    }
    warn!("RTSP probe of {} inconclusive after {} attempts: {}", url, attempts, last_error);
    ProbeReport {
        target: url,
        attempts,
        checked_at: Utc::now(),
        outcome: ProbeOutcome::Inconclusive { reason: last_error },
    }
}

/// GET on the HTTP health endpoint; true on a 2xx with body `OK`.
pub async fn check_http_health(url: &str) -> anyhow::Result<bool> {
    let client = reqwest::Client::builder().timeout(IO_TIMEOUT).build()?;
    let response = client.get(url).send().await?;
    let ok = response.status().is_success();
    let body = response.text().await?;
    Ok(ok && body.trim() == "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_request_shape() {
        let req = options_request("rtsp://127.0.0.1:8554/stream", 3);
        assert!(req.starts_with("OPTIONS rtsp://127.0.0.1:8554/stream RTSP/1.0\r\nCSeq: 3\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn closed_port_is_inconclusive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let settings = ProbeSettings { attempts: 2, backoff: Duration::from_millis(10) };
        let report = probe_rtsp("127.0.0.1", port, "/stream", settings, None).await;
        assert!(!report.is_healthy());
        assert_eq!(report.attempts, 2);
    }
}
