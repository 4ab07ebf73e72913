use log::debug;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;

use crate::common::file_utils;

pub const V4L2_CTL: &str = "v4l2-ctl";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
    pub fps: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelFormat {
    pub fourcc: String,      // e.g. "MJPG", "YUYV"
    pub description: String, // e.g. "Motion-JPEG, compressed"
    pub sizes: Vec<FrameSize>,
}

/// What a capture device advertises. Empty when it could not be queried.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureCapabilities {
    pub formats: Vec<PixelFormat>,
}

impl CaptureCapabilities {
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn supports_mjpeg(&self) -> bool {
        self.formats.iter().any(|f| f.fourcc == "MJPG" || f.fourcc == "JPEG")
    }

    /// True if any format lists `width`x`height`.
    pub fn supports_resolution(&self, width: u32, height: u32) -> bool {
        self.formats
            .iter()
            .flat_map(|f| f.sizes.iter())
            .any(|s| s.width == width && s.height == height)
    }

    pub fn summary(&self) -> String {
        self.formats
            .iter()
            .map(|f| {
                let sizes: Vec<String> = f.sizes.iter().map(|s| format!("{}x{}", s.width, s.height)).collect();
                format!("{} [{}]", f.fourcc, sizes.join(" "))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Parses the output of `v4l2-ctl --list-formats-ext`.
pub fn parse_list_formats_ext(output: &str) -> CaptureCapabilities {
    let mut formats: Vec<PixelFormat> = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.starts_with('[') {
            // [0]: 'MJPG' (Motion-JPEG, compressed)
            let mut quoted = line.split('\'');
            let fourcc = quoted.nth(1).unwrap_or("").trim().to_string();
            if fourcc.is_empty() {
                continue;
            }
            let description = line
                .split_once('(')
                .and_then(|(_, rest)| rest.rsplit_once(')'))
                .map(|(inner, _)| inner.to_string())
                .unwrap_or_default();
            formats.push(PixelFormat { fourcc, description, sizes: Vec::new() });
        } else if let Some(rest) = line.strip_prefix("Size: Discrete ") {
            let Some(format) = formats.last_mut() else { continue };
            if let Some((w, h)) = rest.trim().split_once('x') {
                if let (Ok(width), Ok(height)) = (w.parse(), h.parse()) {
                    format.sizes.push(FrameSize { width, height, fps: Vec::new() });
                }
            }
        } else if line.starts_with("Size: ") {
            debug!("Skipping non-discrete size entry: {}", line);
        } else if let Some(rest) = line.strip_prefix("Interval: ") {
            // Interval: Discrete 0.033s (30.000 fps)
            let fps = rest
                .split_once('(')
                .and_then(|(_, r)| r.split_whitespace().next())
                .and_then(|v| v.parse::<f64>().ok());
            if let (Some(fps), Some(size)) = (fps, formats.last_mut().and_then(|f| f.sizes.last_mut())) {
                size.fps.push(fps);
            }
        }
    }
    CaptureCapabilities { formats }
}

/// Queries `device` through `v4l2-ctl`. Missing tool or failure yields an empty set.
pub async fn probe_capabilities(device: &Path) -> CaptureCapabilities {
    let start_time = Instant::now();
    if file_utils::find_in_path(V4L2_CTL).is_none() {
        debug!("{} not installed; capabilities of {} unknown", V4L2_CTL, device.display());
        return CaptureCapabilities::default();
    }
    let output = Command::new(V4L2_CTL)
        .arg("--device")
        .arg(device)
        .arg("--list-formats-ext")
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            let caps = parse_list_formats_ext(&String::from_utf8_lossy(&out.stdout));
            debug!(
                "Probed {} formats on {} in {:?}",
                caps.formats.len(),
                device.display(),
                start_time.elapsed()
            );
            caps
        }
        Ok(out) => {
            debug!("{} failed for {}: {}", V4L2_CTL, device.display(), String::from_utf8_lossy(&out.stderr).trim());
            CaptureCapabilities::default()
        }
        Err(e) => {
            debug!("Could not run {}: {}", V4L2_CTL, e);
            CaptureCapabilities::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1920x1080
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.067s (15.000 fps)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t[1]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\tSize: Stepwise 16x16 - 1920x1080 with step 1/1
";

    #[test]
    fn parses_formats_sizes_and_intervals() {
        let caps = parse_list_formats_ext(SAMPLE);
        assert_eq!(caps.formats.len(), 2);
        assert_eq!(caps.formats[0].fourcc, "MJPG");
        assert_eq!(caps.formats[0].description, "Motion-JPEG, compressed");
        assert_eq!(caps.formats[0].sizes.len(), 2);
        assert_eq!(caps.formats[0].sizes[0].fps, vec![30.0, 15.0]);
        assert_eq!(caps.formats[1].fourcc, "YUYV");
        assert_eq!(caps.formats[1].sizes.len(), 1);
        assert!(caps.supports_mjpeg());
        assert!(caps.supports_resolution(1280, 720));
        assert!(!caps.supports_resolution(800, 600));
    }

    #[test]
    fn empty_output_gives_empty_set() {
        let caps = parse_list_formats_ext("");
        assert!(caps.is_empty());
        assert!(!caps.supports_mjpeg());
    }
}
