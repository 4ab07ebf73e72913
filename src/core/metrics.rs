use chrono::Utc;
use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Counters exposed on the metrics endpoint. Shared between the supervisor,
/// the health prober and the HTTP handlers.
#[derive(Clone)]
pub struct StreamMetrics {
    pub server_starts_total: IntCounter,
    pub encoder_fallbacks_total: IntCounter,
    /// TCP connections accepted by the RTSP port during probes
    pub probe_connections_total: IntCounter,
    /// Probes answered with an RTSP response
    pub probe_sessions_total: IntCounter,
    pub server_up: IntGauge,
    pub process_start_time_seconds: IntGauge,
    registry: Registry,
}

impl StreamMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Registers the `camrtsp_*` metrics in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let server_starts_total = IntCounter::with_opts(Opts::new(
            "camrtsp_server_starts_total",
            "RTSP server processes started",
        ))?;
        let encoder_fallbacks_total = IntCounter::with_opts(Opts::new(
            "camrtsp_encoder_fallbacks_total",
            "Encoder fallbacks after a failed start",
        ))?;
        let probe_connections_total = IntCounter::with_opts(Opts::new(
            "camrtsp_rtsp_probe_connections_total",
            "TCP connections accepted by the RTSP port during probes",
        ))?;
        let probe_sessions_total = IntCounter::with_opts(Opts::new(
            "camrtsp_rtsp_probe_sessions_total",
            "Probes answered with an RTSP response",
        ))?;
        let server_up = IntGauge::with_opts(Opts::new(
            "camrtsp_server_up",
            "Whether the RTSP server process is running",
        ))?;
        let process_start_time_seconds = IntGauge::with_opts(Opts::new(
            "camrtsp_process_start_time_seconds",
            "Start time of the supervisor",
        ))?;
        process_start_time_seconds.set(Utc::now().timestamp());

        registry.register(Box::new(server_starts_total.clone()))?;
        registry.register(Box::new(encoder_fallbacks_total.clone()))?;
        registry.register(Box::new(probe_connections_total.clone()))?;
        registry.register(Box::new(probe_sessions_total.clone()))?;
        registry.register(Box::new(server_up.clone()))?;
        registry.register(Box::new(process_start_time_seconds.clone()))?;

        Ok(StreamMetrics {
            server_starts_total,
            encoder_fallbacks_total,
            probe_connections_total,
            probe_sessions_total,
            server_up,
            process_start_time_seconds,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_server_start(&self) {
        self.server_starts_total.inc();
    }

    pub fn record_encoder_fallback(&self) {
        self.encoder_fallbacks_total.inc();
    }

    pub fn record_probe_connection(&self) {
        self.probe_connections_total.inc();
    }

    pub fn record_probe_session(&self) {
        self.probe_sessions_total.inc();
    }

    pub fn set_server_up(&self, up: bool) {
        self.server_up.set(i64::from(up));
    }

    pub fn server_starts(&self) -> u64 {
        self.server_starts_total.get()
    }

    pub fn encoder_fallbacks(&self) -> u64 {
        self.encoder_fallbacks_total.get()
    }
}
