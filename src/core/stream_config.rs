use crate::app_config::{AppConfig, Backend, CodecMode};
use crate::core::bitrate;
use crate::core::encoder_probe::EncoderChoice;
use crate::core::pipeline_builder::CaptureFormat;
use crate::errors::AppError;
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;

const ALLOWED_PROFILES: [&str; 3] = ["baseline", "main", "high"];

/// Everything needed to launch the stream, resolved once before any process
/// is spawned. Never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub device: PathBuf,
    pub codec: CodecMode,
    pub backend: Backend,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub capture: CaptureFormat,
    pub bitrate_kbps: u32,
    pub gop_size: u32,
    pub tune: String,
    pub speed_preset: String,
    pub profile: String,
    pub mount_path: String,
    pub port: u16,
    /// Ordered encoder preference; the first entry is the selection.
    pub encoder_chain: Vec<EncoderChoice>,
}

impl StreamConfig {
    /// Validates every value that ends up inside a pipeline description or a
    /// command line and drops encoder choices the capture format cannot feed.
    pub fn resolve(
        config: &AppConfig,
        device: PathBuf,
        capture: CaptureFormat,
        encoder_chain: Vec<EncoderChoice>,
    ) -> Result<Self, AppError> {
        let cam = &config.camera;
        let enc = &config.encoding;

        let device_str = device.to_string_lossy().to_string();
        validate_path_value("camera.device", &device_str)?;
        validate_mount_path(&config.rtsp.mount_path)?;
        validate_word("encoding.tune", &enc.tune)?;
        validate_word("encoding.speed_preset", &enc.speed_preset)?;
        for choice in &encoder_chain {
            if let EncoderChoice::Hardware { element, props, .. } = choice {
                validate_word("encoding.hardware_priority", element)?;
                for (k, v) in props {
                    validate_word("encoder property", k)?;
                    validate_word("encoder property", v)?;
                }
            }
        }

        let profile = if ALLOWED_PROFILES.contains(&enc.profile.as_str()) {
            enc.profile.clone()
        } else {
            debug!("Unsupported profile '{}'; using baseline", enc.profile);
            "baseline".to_string()
        };

        let encoder_chain: Vec<EncoderChoice> = encoder_chain
            .into_iter()
            .filter(|choice| choice.is_h264() || capture == CaptureFormat::Mjpeg)
            .collect();
        if encoder_chain.is_empty() {
            return Err(AppError::EncoderUnavailable(format!(
                "no usable encoder for {} capture on {}",
                capture, device_str
            )));
        }

        let bitrate_kbps = bitrate::effective_bitrate_kbps(
            enc.bitrate_kbps,
            enc.auto_bitrate,
            cam.width,
            cam.height,
            cam.framerate,
            enc.auto_bitrate_factor,
        );
        if enc.bitrate_kbps == 0 {
            info!("Auto bitrate: {} kbps (factor={})", bitrate_kbps, enc.auto_bitrate_factor);
        }

        Ok(StreamConfig {
            device,
            codec: enc.codec,
            backend: config.rtsp.backend,
            width: cam.width,
            height: cam.height,
            framerate: cam.framerate,
            capture,
            bitrate_kbps,
            gop_size: enc.gop_size,
            tune: enc.tune.clone(),
            speed_preset: enc.speed_preset.clone(),
            profile,
            mount_path: config.rtsp.mount_path.clone(),
            port: config.rtsp.port,
            encoder_chain,
        })
    }

    pub fn selected_encoder(&self) -> &EncoderChoice {
        // resolve() guarantees a non-empty chain
        &self.encoder_chain[0]
    }

    pub fn rtsp_url(&self, host: &str) -> String {
        format!("rtsp://{}:{}{}", host, self.port, self.mount_path)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> AppError {
    AppError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Identifiers such as element names, presets and property values.
pub fn validate_word(field: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(invalid(field, value, "must not be empty"));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        return Err(invalid(field, value, "only letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(())
}

/// Filesystem paths interpolated into launch descriptions.
pub fn validate_path_value(field: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(invalid(field, value, "must not be empty"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.' | ':' | '+'))
    {
        return Err(invalid(field, value, "contains characters unsafe for a pipeline description"));
    }
    Ok(())
}

pub fn validate_mount_path(value: &str) -> Result<(), AppError> {
    if !value.starts_with('/') || value.len() < 2 {
        return Err(invalid("rtsp.mount_path", value, "must start with '/' and name a path"));
    }
    if !value[1..]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
    {
        return Err(invalid("rtsp.mount_path", value, "only letters, digits, '/', '_', '-' and '.' are allowed"));
    }
    Ok(())
}
