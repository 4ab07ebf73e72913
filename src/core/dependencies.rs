use crate::app_config::{AppConfig, Backend};
use crate::common::file_utils::find_in_path;
use crate::core::encoder_probe::{FFMPEG, GST_INSPECT};
use crate::core::pipeline_builder::{GST_RTSP_LAUNCH, MEDIAMTX};
use crate::core::preflight::GST_LAUNCH;
use crate::errors::AppError;
use log::debug;

/// External binaries a run needs, with what each one is for.
pub fn required_binaries(config: &AppConfig, preflight: bool) -> Vec<(String, &'static str)> {
    let server = |default: &str| {
        if config.rtsp.server_binary.is_empty() {
            default.to_string()
        } else {
            config.rtsp.server_binary.clone()
        }
    };
    let mut required = match config.rtsp.backend {
        Backend::Gstreamer => vec![
            (server(GST_RTSP_LAUNCH), "RTSP server"),
            (GST_INSPECT.to_string(), "encoder discovery"),
        ],
        Backend::Mediamtx => vec![
            (server(MEDIAMTX), "RTSP server"),
            (FFMPEG.to_string(), "capture and encoder push"),
        ],
    };
    if preflight {
        required.push((GST_LAUNCH.to_string(), "capture preflight"));
    }
    required
}

/// Fails on the first binary missing from PATH.
pub fn check_dependencies(required: &[(String, &'static str)]) -> Result<(), AppError> {
    for (binary, purpose) in required {
        match find_in_path(binary) {
            Some(path) => debug!("Found {} at {}", binary, path.display()),
            None => {
                return Err(AppError::MissingDependency {
                    binary: binary.clone(),
                    purpose: purpose.to_string(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binaries_follow_backend_and_preflight() {
        let mut config = AppConfig::default();
        let names = |c: &AppConfig, p: bool| required_binaries(c, p).into_iter().map(|(b, _)| b).collect::<Vec<_>>();
        assert_eq!(names(&config, true), vec!["gst-rtsp-launch", "gst-inspect-1.0", "gst-launch-1.0"]);

        config.rtsp.backend = Backend::Mediamtx;
        config.rtsp.server_binary = "/opt/mediamtx/mediamtx".into();
        assert_eq!(names(&config, false), vec!["/opt/mediamtx/mediamtx", "ffmpeg"]);
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = check_dependencies(&[("definitely-not-installed-camrtsp".to_string(), "test")]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(check_dependencies(&[("sh".to_string(), "shell")]).is_ok());
    }
}
