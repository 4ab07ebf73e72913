use crate::app_config::{Backend, CodecMode};
use crate::errors::AppError;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::OnceCell;

pub const GST_INSPECT: &str = "gst-inspect-1.0";
pub const FFMPEG: &str = "ffmpeg";

/// Which property carries the target bitrate on a hardware element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BitrateProperty {
    /// `bitrate=<kbps>`
    Kbps,
    /// `target-bitrate=<bps>`
    Bps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EncoderChoice {
    Hardware {
        element: String,
        props: Vec<(String, String)>,
        bitrate_property: Option<BitrateProperty>,
    },
    Software {
        element: String,
    },
    MjpegPassthrough,
}

impl EncoderChoice {
    pub fn name(&self) -> &str {
        match self {
            EncoderChoice::Hardware { element, .. } | EncoderChoice::Software { element } => element,
            EncoderChoice::MjpegPassthrough => "mjpeg-passthrough",
        }
    }

    pub fn is_h264(&self) -> bool {
        !matches!(self, EncoderChoice::MjpegPassthrough)
    }
}

impl fmt::Display for EncoderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderChoice::Hardware { element, .. } => write!(f, "{} (hardware)", element),
            EncoderChoice::Software { element } => write!(f, "{} (software)", element),
            EncoderChoice::MjpegPassthrough => write!(f, "MJPEG passthrough"),
        }
    }
}

struct EncoderTable {
    hardware: &'static [(&'static str, &'static [(&'static str, &'static str)])],
    software: &'static str,
}

const GST_TABLE: EncoderTable = EncoderTable {
    hardware: &[
        ("v4l2h264enc", &[("insert-sps-pps", "true")]),
        ("vaapih264enc", &[("rate-control", "cbr")]),
        ("nvh264enc", &[("preset", "low-latency-hq")]),
        ("omxh264enc", &[]),
        ("qsvh264enc", &[("rate-control", "cbr")]),
    ],
    software: "x264enc",
};

const FFMPEG_TABLE: EncoderTable = EncoderTable {
    hardware: &[
        ("h264_v4l2m2m", &[]),
        ("h264_vaapi", &[]),
        ("h264_nvenc", &[("preset", "p1"), ("tune", "ll")]),
        ("h264_qsv", &[("preset", "veryfast")]),
    ],
    software: "libx264",
};

fn table_for(backend: Backend) -> &'static EncoderTable {
    match backend {
        Backend::Gstreamer => &GST_TABLE,
        Backend::Mediamtx => &FFMPEG_TABLE,
    }
}

/// Binary whose introspection tells us which encoders exist.
pub fn catalog_binary(backend: Backend) -> &'static str {
    match backend {
        Backend::Gstreamer => GST_INSPECT,
        Backend::Mediamtx => FFMPEG,
    }
}

/// Parsed `encoding.hardware_priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwarePriority {
    Auto,
    Off,
    Explicit(Vec<String>),
}

impl HardwarePriority {
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "" | "auto" => HardwarePriority::Auto,
            "off" | "none" => HardwarePriority::Off,
            list => HardwarePriority::Explicit(
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }

    /// Ordered hardware candidates for `backend`: an explicit list first, then
    /// the built-in list without duplicates.
    fn candidates(&self, backend: Backend) -> Vec<String> {
        let builtin = table_for(backend).hardware.iter().map(|(name, _)| name.to_string());
        match self {
            HardwarePriority::Off => Vec::new(),
            HardwarePriority::Auto => builtin.collect(),
            HardwarePriority::Explicit(list) => {
                let mut ordered = list.clone();
                for name in builtin {
                    if !ordered.contains(&name) {
                        ordered.push(name);
                    }
                }
                ordered
            }
        }
    }
}

/// Answers "is this encoder installed" for one media framework.
#[async_trait]
pub trait EncoderCatalog: Send + Sync {
    async fn has_encoder(&self, name: &str) -> bool;
    async fn has_property(&self, element: &str, property: &str) -> bool;
}

/// Uses `gst-inspect-1.0 <element>`.
#[derive(Default)]
pub struct GstInspectCatalog {
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl GstInspectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn inspect(&self, element: &str) -> Option<String> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(element) {
                return hit.clone();
            }
        }
        let output = Command::new(GST_INSPECT).arg(element).output().await;
        let text = match output {
            Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(_) => None,
            Err(e) => {
                debug!("Could not run {} {}: {}", GST_INSPECT, element, e);
                None
            }
        };
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(element.to_string(), text.clone());
        }
        text
    }
}

#[async_trait]
impl EncoderCatalog for GstInspectCatalog {
    async fn has_encoder(&self, name: &str) -> bool {
        self.inspect(name).await.is_some()
    }

    async fn has_property(&self, element: &str, property: &str) -> bool {
        self.inspect(element)
            .await
            .map(|text| inspect_lists_property(&text, property))
            .unwrap_or(false)
    }
}

/// True if `gst-inspect-1.0` output has a property row named `property`.
pub fn inspect_lists_property(inspect_output: &str, property: &str) -> bool {
    inspect_output.lines().any(|line| {
        let mut parts = line.trim_start().splitn(2, ':');
        let name = parts.next().unwrap_or("").trim();
        parts.next().is_some() && name == property
    })
}

/// Uses `ffmpeg -hide_banner -encoders`, queried once.
#[derive(Default)]
pub struct FfmpegCatalog {
    encoders: OnceCell<Vec<String>>,
}

impl FfmpegCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn encoders(&self) -> &Vec<String> {
        self.encoders
            .get_or_init(|| async {
                match Command::new(FFMPEG).args(["-hide_banner", "-encoders"]).output().await {
                    Ok(out) => parse_ffmpeg_encoders(&String::from_utf8_lossy(&out.stdout)),
                    Err(e) => {
                        debug!("Could not run {} -encoders: {}", FFMPEG, e);
                        Vec::new()
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl EncoderCatalog for FfmpegCatalog {
    async fn has_encoder(&self, name: &str) -> bool {
        self.encoders().await.iter().any(|e| e == name)
    }

    async fn has_property(&self, _element: &str, _property: &str) -> bool {
        // every ffmpeg video encoder honours -b:v
        true
    }
}

/// Video encoder names from `ffmpeg -encoders` (rows like ` V....D libx264  ...`).
pub fn parse_ffmpeg_encoders(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let flags = cols.next()?;
            let name = cols.next()?;
            (flags.len() == 6 && flags.starts_with('V') && name != "=").then(|| name.to_string())
        })
        .collect()
}

pub fn catalog_for(backend: Backend) -> Box<dyn EncoderCatalog> {
    match backend {
        Backend::Gstreamer => Box::new(GstInspectCatalog::new()),
        Backend::Mediamtx => Box::new(FfmpegCatalog::new()),
    }
}

/// Builds the ordered encoder chain. The first entry is the selection; the
/// rest are the fallbacks the supervisor may walk.
pub async fn select_encoder_chain(
    codec: CodecMode,
    priority: &HardwarePriority,
    backend: Backend,
    catalog: &dyn EncoderCatalog,
) -> Result<Vec<EncoderChoice>, AppError> {
    let start_time = Instant::now();
    if codec == CodecMode::Mjpeg {
        info!("🎞️ Codec mjpeg requested; using MJPEG passthrough");
        return Ok(vec![EncoderChoice::MjpegPassthrough]);
    }

    let table = table_for(backend);
    let mut chain = Vec::new();
    for name in priority.candidates(backend) {
        if !catalog.has_encoder(&name).await {
            debug!("  Hardware encoder {} not available", name);
            continue;
        }
        let props = table
            .hardware
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, props)| props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default();
        let bitrate_property = if catalog.has_property(&name, "bitrate").await {
            Some(BitrateProperty::Kbps)
        } else if catalog.has_property(&name, "target-bitrate").await {
            Some(BitrateProperty::Bps)
        } else {
            warn!("Encoder {} has no bitrate property; using its defaults", name);
            None
        };
        chain.push(EncoderChoice::Hardware { element: name, props, bitrate_property });
    }
    if catalog.has_encoder(table.software).await {
        chain.push(EncoderChoice::Software { element: table.software.to_string() });
    } else {
        debug!("  Software encoder {} not available", table.software);
    }

    match codec {
        CodecMode::H264 if chain.is_empty() => {
            return Err(AppError::EncoderUnavailable(format!(
                "codec h264 requested but no H.264 encoder is installed for backend {}",
                backend
            )));
        }
        CodecMode::Auto => {
            if chain.is_empty() {
                warn!("No H.264 encoder found; using MJPEG passthrough");
            }
            chain.push(EncoderChoice::MjpegPassthrough);
        }
        _ => {}
    }

    let names: Vec<&str> = chain.iter().map(EncoderChoice::name).collect();
    info!("🎞️ Encoder chain [{}] selected in {:?}", names.join(" → "), start_time.elapsed());
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct StaticCatalog {
        encoders: HashSet<&'static str>,
        with_bitrate: HashSet<&'static str>,
    }

    #[async_trait]
    impl EncoderCatalog for StaticCatalog {
        async fn has_encoder(&self, name: &str) -> bool {
            self.encoders.contains(name)
        }
        async fn has_property(&self, element: &str, property: &str) -> bool {
            property == "bitrate" && self.with_bitrate.contains(element)
        }
    }

    fn catalog(encoders: &[&'static str]) -> StaticCatalog {
        StaticCatalog {
            encoders: encoders.iter().copied().collect(),
            with_bitrate: ["vaapih264enc"].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn auto_prefers_hardware_then_software_then_mjpeg() {
        let cat = catalog(&["nvh264enc", "vaapih264enc", "x264enc"]);
        let chain = select_encoder_chain(CodecMode::Auto, &HardwarePriority::Auto, Backend::Gstreamer, &cat)
            .await
            .unwrap();
        let names: Vec<&str> = chain.iter().map(EncoderChoice::name).collect();
        assert_eq!(names, vec!["vaapih264enc", "nvh264enc", "x264enc", "mjpeg-passthrough"]);
        match &chain[0] {
            EncoderChoice::Hardware { props, bitrate_property, .. } => {
                assert_eq!(props, &vec![("rate-control".to_string(), "cbr".to_string())]);
                assert_eq!(*bitrate_property, Some(BitrateProperty::Kbps));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn explicit_priority_goes_first() {
        let cat = catalog(&["nvh264enc", "vaapih264enc", "x264enc"]);
        let priority = HardwarePriority::parse("NVH264ENC, qsvh264enc");
        let chain = select_encoder_chain(CodecMode::H264, &priority, Backend::Gstreamer, &cat).await.unwrap();
        assert_eq!(chain[0].name(), "nvh264enc");
        assert_eq!(chain[1].name(), "vaapih264enc");
        assert_eq!(chain.last().unwrap().name(), "x264enc");
    }

    #[tokio::test]
    async fn off_skips_hardware_and_mjpeg_is_last_resort() {
        let cat = catalog(&["vaapih264enc"]);
        let chain = select_encoder_chain(CodecMode::Auto, &HardwarePriority::Off, Backend::Gstreamer, &cat)
            .await
            .unwrap();
        assert_eq!(chain, vec![EncoderChoice::MjpegPassthrough]);
    }

    #[tokio::test]
    async fn forced_h264_without_encoders_is_unavailable() {
        let cat = catalog(&[]);
        let err = select_encoder_chain(CodecMode::H264, &HardwarePriority::Auto, Backend::Mediamtx, &cat)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EncoderUnavailable(_)));
    }

    #[test]
    fn parses_ffmpeg_encoder_listing() {
        let out = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_vaapi           H.264/AVC (VAAPI) (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";
        assert_eq!(parse_ffmpeg_encoders(out), vec!["libx264", "h264_vaapi"]);
    }

    #[test]
    fn finds_gst_inspect_properties() {
        let out = "Element Properties:
  bitrate             : Bitrate in kbit/sec
                        flags: readable, writable
  tune                : Preset name for non-psychovisual tuning options
";
        assert!(inspect_lists_property(out, "bitrate"));
        assert!(inspect_lists_property(out, "tune"));
        assert!(!inspect_lists_property(out, "target-bitrate"));
    }
}
