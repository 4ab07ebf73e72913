use crate::app_config::Backend;
use crate::core::encoder_probe::{BitrateProperty, EncoderChoice, FFMPEG};
use crate::core::stream_config::StreamConfig;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const GST_RTSP_LAUNCH: &str = "gst-rtsp-launch";
pub const MEDIAMTX: &str = "mediamtx";
pub const MEDIAMTX_CONFIG_FILE: &str = "mediamtx.yml";
const VAAPI_RENDER_NODE: &str = "/dev/dri/renderD128";

/// Pixel stream the camera is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Mjpeg,
    Raw,
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFormat::Mjpeg => write!(f, "mjpeg"),
            CaptureFormat::Raw => write!(f, "raw"),
        }
    }
}

/// GStreamer caps for the capture side, only naming what is known.
pub fn capture_caps(format: CaptureFormat, width: u32, height: u32, framerate: u32) -> String {
    let mut caps = match format {
        CaptureFormat::Mjpeg => "image/jpeg".to_string(),
        CaptureFormat::Raw => "video/x-raw".to_string(),
    };
    if width > 0 && height > 0 {
        caps.push_str(&format!(",width={},height={}", width, height));
    }
    if framerate > 0 {
        caps.push_str(&format!(",framerate={}/1", framerate));
    }
    caps
}

/// One external process to spawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        ProcessSpec { program: program.into(), args, env: BTreeMap::new() }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| {
            if a.contains(' ') {
                format!("'{}'", a)
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

/// What the supervisor launches for one encoder attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchPlan {
    pub encoder: EncoderChoice,
    pub server: ProcessSpec,
    /// Encoder-push process for the MediaMTX backend.
    pub pusher: Option<ProcessSpec>,
    /// Generated server config to write before spawning.
    pub config_file: Option<(PathBuf, String)>,
    /// Human-readable form shown by `print-pipeline`.
    pub description: String,
}

/// GStreamer launch description for `encoder`.
pub fn gst_launch_description(stream: &StreamConfig, encoder: &EncoderChoice) -> String {
    let device = stream.device.display();
    let caps = capture_caps(stream.capture, stream.width, stream.height, stream.framerate);
    let decode_chain = match stream.capture {
        CaptureFormat::Mjpeg => "jpegdec ! videoconvert ! ",
        CaptureFormat::Raw => "videoconvert ! ",
    };
    let source_chain = format!(
        "v4l2src device={} ! {} ! {}queue leaky=downstream max-size-buffers=1 ! ",
        device, caps, decode_chain
    );
    let payload = "h264parse config-interval=1 disable-passthrough=true ! rtph264pay name=pay0 pt=96 config-interval=1";

    match encoder {
        EncoderChoice::Hardware { element, props, bitrate_property } => {
            let mut parts = vec![element.clone()];
            parts.extend(props.iter().map(|(k, v)| format!("{}={}", k, v)));
            match bitrate_property {
                Some(BitrateProperty::Kbps) => parts.push(format!("bitrate={}", stream.bitrate_kbps)),
                Some(BitrateProperty::Bps) => parts.push(format!("target-bitrate={}", u64::from(stream.bitrate_kbps) * 1000)),
                None => {}
            }
            format!("{}{} ! {}", source_chain, parts.join(" "), payload)
        }
        EncoderChoice::Software { element } => format!(
            "{}{} bitrate={} tune={} speed-preset={} key-int-max={} bframes=0 byte-stream=false \
             intra-refresh=true rc-lookahead=0 aud=false threads=2 pass=qual \
             ! video/x-h264,profile={},stream-format=avc,alignment=au ! {}",
            source_chain,
            element,
            stream.bitrate_kbps,
            stream.tune,
            stream.speed_preset,
            stream.gop_size,
            stream.profile,
            payload
        ),
        EncoderChoice::MjpegPassthrough => {
            let caps = capture_caps(CaptureFormat::Mjpeg, stream.width, stream.height, stream.framerate);
            format!(
                "v4l2src device={} ! {} ! queue leaky=downstream max-size-buffers=1 ! rtpjpegpay name=pay0 pt=26",
                device, caps
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaMtxPath {
    pub source: String,
}

/// Minimal MediaMTX configuration: RTSP only, one publisher path.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaMtxConfig {
    pub log_level: String,
    pub rtsp: bool,
    pub rtsp_address: String,
    pub rtmp: bool,
    pub hls: bool,
    pub webrtc: bool,
    pub srt: bool,
    pub paths: BTreeMap<String, MediaMtxPath>,
}

pub fn mediamtx_config(stream: &StreamConfig) -> MediaMtxConfig {
    let mut paths = BTreeMap::new();
    paths.insert(
        stream.mount_path.trim_start_matches('/').to_string(),
        MediaMtxPath { source: "publisher".to_string() },
    );
    MediaMtxConfig {
        log_level: "info".to_string(),
        rtsp: true,
        rtsp_address: format!(":{}", stream.port),
        rtmp: false,
        hls: false,
        webrtc: false,
        srt: false,
        paths,
    }
}

/// `ffmpeg` arguments capturing from the camera and publishing to the local
/// MediaMTX path.
pub fn ffmpeg_push_args(stream: &StreamConfig, encoder: &EncoderChoice) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];
    let is_vaapi = matches!(encoder, EncoderChoice::Hardware { element, .. } if element == "h264_vaapi");
    if is_vaapi {
        args.extend(["-vaapi_device".to_string(), VAAPI_RENDER_NODE.to_string()]);
    }

    let input_format = match (encoder, stream.capture) {
        (EncoderChoice::MjpegPassthrough, _) | (_, CaptureFormat::Mjpeg) => "mjpeg",
        (_, CaptureFormat::Raw) => "yuyv422",
    };
    args.extend(["-f".into(), "v4l2".into(), "-input_format".into(), input_format.into()]);
    if stream.width > 0 && stream.height > 0 {
        args.extend(["-video_size".into(), format!("{}x{}", stream.width, stream.height)]);
    }
    if stream.framerate > 0 {
        args.extend(["-framerate".into(), stream.framerate.to_string()]);
    }
    args.extend(["-i".into(), stream.device.display().to_string()]);

    let bitrate = format!("{}k", stream.bitrate_kbps);
    match encoder {
        EncoderChoice::MjpegPassthrough => {
            args.extend(["-c:v".into(), "copy".into()]);
        }
        EncoderChoice::Software { element } => {
            args.extend([
                "-c:v".into(),
                element.clone(),
                "-preset".into(),
                stream.speed_preset.clone(),
                "-tune".into(),
                stream.tune.clone(),
                "-profile:v".into(),
                stream.profile.clone(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-bf".into(),
                "0".into(),
            ]);
        }
        EncoderChoice::Hardware { element, props, .. } => {
            if is_vaapi {
                args.extend(["-vf".into(), "format=nv12,hwupload".into()]);
            } else {
                args.extend(["-pix_fmt".into(), "yuv420p".into()]);
            }
            args.extend(["-c:v".into(), element.clone()]);
            for (k, v) in props {
                args.extend([format!("-{}", k), v.clone()]);
            }
        }
    }
    if encoder.is_h264() {
        args.extend([
            "-b:v".into(),
            bitrate.clone(),
            "-maxrate".into(),
            bitrate,
            "-bufsize".into(),
            format!("{}k", u64::from(stream.bitrate_kbps) * 2),
            "-g".into(),
            stream.gop_size.to_string(),
        ]);
    }
    args.extend([
        "-f".into(),
        "rtsp".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        stream.rtsp_url("127.0.0.1"),
    ]);
    args
}

/// Renders the processes for one encoder attempt.
pub fn build_launch_plan(
    stream: &StreamConfig,
    encoder: &EncoderChoice,
    server_binary: &str,
    runtime_dir: &Path,
    media_env: &BTreeMap<String, String>,
) -> anyhow::Result<LaunchPlan> {
    let plan = match stream.backend {
        Backend::Gstreamer => {
            let description = gst_launch_description(stream, encoder);
            let binary = if server_binary.is_empty() { GST_RTSP_LAUNCH } else { server_binary };
            let mut server = ProcessSpec::new(
                binary,
                vec![
                    "--port".into(),
                    stream.port.to_string(),
                    "--mount".into(),
                    stream.mount_path.clone(),
                    format!("( {} )", description),
                ],
            );
            server.env = media_env.clone();
            LaunchPlan { encoder: encoder.clone(), server, pusher: None, config_file: None, description }
        }
        Backend::Mediamtx => {
            let config_path = runtime_dir.join(MEDIAMTX_CONFIG_FILE);
            let config_yaml = serde_yaml::to_string(&mediamtx_config(stream))?;
            let binary = if server_binary.is_empty() { MEDIAMTX } else { server_binary };
            let server = ProcessSpec::new(binary, vec![config_path.display().to_string()]);
            let pusher = ProcessSpec::new(FFMPEG, ffmpeg_push_args(stream, encoder));
            let description = format!(
                "# {}\n{}\n# encoder push\n{}",
                config_path.display(),
                config_yaml.trim_end(),
                pusher.command_line()
            );
            LaunchPlan {
                encoder: encoder.clone(),
                server,
                pusher: Some(pusher),
                config_file: Some((config_path, config_yaml)),
                description,
            }
        }
    };
    debug!("Launch plan for {}: {}", encoder, plan.server.command_line());
    Ok(plan)
}
