pub const MIN_BITRATE_KBPS: u32 = 300;
pub const MAX_BITRATE_KBPS: u32 = 25_000;
pub const FALLBACK_BITRATE_KBPS: u32 = 2000;

/// `round(width * height * framerate * factor)` clamped to
/// [`MIN_BITRATE_KBPS`, `MAX_BITRATE_KBPS`]; [`FALLBACK_BITRATE_KBPS`] when any
/// dimension is unknown (zero).
pub fn auto_bitrate_kbps(width: u32, height: u32, framerate: u32, factor: f64) -> u32 {
    if width == 0 || height == 0 || framerate == 0 {
        return FALLBACK_BITRATE_KBPS;
    }
    let raw = (f64::from(width) * f64::from(height) * f64::from(framerate) * factor).round();
    if !raw.is_finite() || raw <= f64::from(MIN_BITRATE_KBPS) {
        return MIN_BITRATE_KBPS;
    }
    if raw >= f64::from(MAX_BITRATE_KBPS) {
        return MAX_BITRATE_KBPS;
    }
    raw as u32
}

/// Effective bitrate: an explicit value wins, otherwise the heuristic when
/// enabled, otherwise the fallback.
pub fn effective_bitrate_kbps(
    configured_kbps: u32,
    auto_bitrate: bool,
    width: u32,
    height: u32,
    framerate: u32,
    factor: f64,
) -> u32 {
    if configured_kbps > 0 {
        configured_kbps
    } else if auto_bitrate {
        auto_bitrate_kbps(width, height, framerate, factor)
    } else {
        FALLBACK_BITRATE_KBPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hd_720p_25fps() {
        assert_eq!(auto_bitrate_kbps(1280, 720, 25, 0.00007), 1612);
    }

    #[test]
    fn clamps_to_floor_and_ceiling() {
        assert_eq!(auto_bitrate_kbps(160, 120, 5, 0.00007), 300);
        assert_eq!(auto_bitrate_kbps(3840, 2160, 60, 0.001), 25_000);
    }

    #[test]
    fn unknown_dimensions_use_fallback() {
        assert_eq!(auto_bitrate_kbps(0, 720, 25, 0.00007), 2000);
        assert_eq!(auto_bitrate_kbps(1280, 720, 0, 0.00007), 2000);
    }

    #[test]
    fn explicit_bitrate_wins() {
        assert_eq!(effective_bitrate_kbps(4000, true, 1280, 720, 25, 0.00007), 4000);
        assert_eq!(effective_bitrate_kbps(0, true, 1280, 720, 25, 0.00007), 1612);
        assert_eq!(effective_bitrate_kbps(0, false, 1280, 720, 25, 0.00007), 2000);
    }
}
