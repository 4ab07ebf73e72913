use serde::{Deserialize, Serialize};
use std::fmt;

/// Codec mode requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    Auto,
    H264,
    #[serde(alias = "jpeg")]
    Mjpeg,
}

impl fmt::Display for CodecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecMode::Auto => write!(f, "auto"),
            CodecMode::H264 => write!(f, "h264"),
            CodecMode::Mjpeg => write!(f, "mjpeg"),
        }
    }
}

/// Which external streaming stack serves the RTSP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `gst-rtsp-launch` serving a GStreamer launch description.
    Gstreamer,
    /// MediaMTX server fed by an `ffmpeg` encoder-push process.
    Mediamtx,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Gstreamer => write!(f, "gstreamer"),
            Backend::Mediamtx => write!(f, "mediamtx"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    pub device: String, // "auto" or an explicit device path
    pub width: u32,     // 0 = let the camera decide
    pub height: u32,
    pub framerate: u32,
    pub prefer_raw: bool,
    pub preflight: bool,
    pub preflight_timeout_secs: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        CameraSettings {
            device: "auto".to_string(),
            width: 0,
            height: 0,
            framerate: 0,
            prefer_raw: false,
            preflight: true,
            preflight_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EncodingSettings {
    pub codec: CodecMode,
    pub bitrate_kbps: u32, // 0 = derive via heuristic
    pub auto_bitrate: bool,
    pub auto_bitrate_factor: f64,
    pub gop_size: u32,
    pub tune: String,
    pub speed_preset: String,
    pub profile: String,
    pub hardware_priority: String, // "auto", "off" or a comma-separated list
}

impl Default for EncodingSettings {
    fn default() -> Self {
        EncodingSettings {
            codec: CodecMode::Auto,
            bitrate_kbps: 0,
            auto_bitrate: true,
            auto_bitrate_factor: 0.00007,
            gop_size: 60,
            tune: "zerolatency".to_string(),
            speed_preset: "ultrafast".to_string(),
            profile: "baseline".to_string(),
            hardware_priority: "auto".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RtspSettings {
    pub port: u16,
    pub mount_path: String,
    pub backend: Backend,
    /// Terminate whatever holds `port` before starting.
    pub kill_existing: bool,
    pub server_binary: String, // empty = backend default
    pub runtime_dir: String,   // where generated server configs are written
}

impl Default for RtspSettings {
    fn default() -> Self {
        RtspSettings {
            port: 8554,
            mount_path: "/stream".to_string(),
            backend: Backend::Gstreamer,
            kill_existing: true,
            server_binary: String::new(),
            runtime_dir: "/tmp/camrtsp".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub verbose: bool,
    pub log_file: String,
    pub gst_debug_level: u32,
    pub gst_debug_categories: String,
    pub gst_debug_file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            verbose: false,
            log_file: String::new(),
            gst_debug_level: 0,
            gst_debug_categories: String::new(),
            gst_debug_file: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HealthSettings {
    pub health_port: u16,  // 0 = disabled
    pub metrics_port: u16, // 0 = disabled
    pub probe: bool,
    pub probe_attempts: u32,
    pub probe_backoff_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            health_port: 0,
            metrics_port: 0,
            probe: true,
            probe_attempts: 5,
            probe_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_start_attempts: u32,
    pub settle_ms: u64,
    pub grace_ms: u64,
    pub port_free_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSettings {
            max_start_attempts: 3,
            settle_ms: 1500,
            grace_ms: 3000,
            port_free_timeout_ms: 5000,
            poll_interval_ms: 250,
        }
    }
}

/// Fully merged configuration. Produced once by `config_loader::build_config`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraSettings,
    pub encoding: EncodingSettings,
    pub rtsp: RtspSettings,
    pub logging: LoggingSettings,
    pub health: HealthSettings,
    pub supervisor: SupervisorSettings,
}

impl AppConfig {
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
