use crate::config_loader::CliOverrides;
use crate::core::installer::{DEFAULT_PREFIX, DEFAULT_SERVICE_USER, DEFAULT_UNIT_DIR, DEFAULT_UNIT_NAME};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::debug;
use std::time::Instant;

fn stream_arg(id: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(id).long(id).value_name(value_name).help(help).global(true).action(ArgAction::Set)
}

fn flag(id: &'static str, help: &'static str) -> Arg {
    Arg::new(id).long(id).help(help).action(ArgAction::SetTrue)
}

fn installation_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("prefix").long("prefix").value_name("DIR").default_value(DEFAULT_PREFIX).help("Installation directory").action(ArgAction::Set))
        .arg(Arg::new("user").long("user").value_name("NAME").default_value(DEFAULT_SERVICE_USER).help("Service account").action(ArgAction::Set))
        .arg(Arg::new("unit-name").long("unit-name").value_name("NAME").default_value(DEFAULT_UNIT_NAME).help("systemd unit name").action(ArgAction::Set))
        .arg(Arg::new("unit-dir").long("unit-dir").value_name("DIR").default_value(DEFAULT_UNIT_DIR).help("Directory the unit file is written to").action(ArgAction::Set))
        .arg(Arg::new("exe").long("exe").value_name("PATH").help("Binary the unit starts (default: this executable)").action(ArgAction::Set))
}

pub fn build_cli() -> Command {
    debug!("⚙️ Building CLI interface...");
    let start_time = Instant::now();
    let cmd = Command::new("cam-rtsp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Expose a V4L2 camera as an RTSP stream through gst-rtsp-launch or MediaMTX.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom configuration file")
                .global(true)
                .action(ArgAction::Set)
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .global(true)
                .action(ArgAction::SetTrue)
        )
        .arg(stream_arg("device", "PATH", "Camera device path or 'auto'"))
        .arg(stream_arg("width", "PIXELS", "Capture width").value_parser(clap::value_parser!(u32)))
        .arg(stream_arg("height", "PIXELS", "Capture height").value_parser(clap::value_parser!(u32)))
        .arg(stream_arg("framerate", "FPS", "Capture framerate").value_parser(clap::value_parser!(u32)))
        .arg(stream_arg("codec", "MODE", "auto, h264 or mjpeg").value_parser(["auto", "h264", "mjpeg", "jpeg"]))
        .arg(stream_arg("bitrate-kbps", "KBPS", "Target bitrate; 0 computes one from resolution and framerate").value_parser(clap::value_parser!(u32)))
        .arg(flag("no-preflight", "Skip the trial capture").global(true))
        .arg(stream_arg("mount-path", "PATH", "RTSP mount path"))
        .arg(stream_arg("port", "PORT", "RTSP port").value_parser(clap::value_parser!(u16)))
        .arg(stream_arg("backend", "NAME", "gstreamer or mediamtx").value_parser(["gstreamer", "mediamtx"]))
        .arg(stream_arg("health-port", "PORT", "HTTP health endpoint port (0 disables)").value_parser(clap::value_parser!(u16)))
        .arg(stream_arg("metrics-port", "PORT", "HTTP metrics endpoint port (0 disables)").value_parser(clap::value_parser!(u16)))
        .arg(stream_arg("log-file", "FILE", "Write logs to FILE instead of stderr"))
        .arg(flag("verbose", "Verbose logging; list-devices also shows capabilities").short('v').global(true))
        .arg(stream_arg("gst-debug", "LEVEL|CATEGORIES", "GStreamer debug level (number) or categories (e.g. rtsp*:5,v4l2src:4)"))
        .arg(stream_arg("gst-debug-file", "FILE", "File GStreamer writes its debug log to"))
        .subcommand(
            Command::new("run")
                .about("Starts the RTSP server and supervises it (default)")
                .arg(flag("print-pipeline", "Print the launch plan before starting"))
                .arg(flag("dry-run", "Resolve everything and print the launch plan without starting"))
                .arg(flag("skip-cleanup", "Do not terminate processes holding the RTSP port"))
                .arg(flag("skip-health-probe", "Do not probe the RTSP port after start"))
                .arg(flag("interactive", "Stop when 'q' is entered on stdin"))
        )
        .subcommand(Command::new("list-devices").about("Lists V4L2 capture devices"))
        .subcommand(Command::new("print-pipeline").about("Prints the resolved pipeline or server config without starting"))
        .subcommand(Command::new("preflight").about("Runs a short trial capture (MJPEG, then raw)"))
        .subcommand(Command::new("dump-config").about("Prints the effective configuration as YAML"))
        .subcommand(
            Command::new("probe")
                .about("Probes the RTSP port (and HTTP health endpoint if configured)")
                .arg(Arg::new("host").long("host").value_name("HOST").default_value("127.0.0.1").help("Host to probe").action(ArgAction::Set))
        )
        .subcommand(
            installation_args(Command::new("install").about("Creates the service account, directory, default config and systemd unit"))
                .arg(flag("no-user", "Do not create or chown to the service account"))
                .arg(flag("no-enable", "Write the unit without enabling it"))
        )
        .subcommand(
            installation_args(Command::new("uninstall").about("Stops, disables and removes the systemd unit"))
                .arg(flag("purge", "Also delete the installation directory"))
                .arg(flag("remove-user", "Also delete the service account"))
        )
        .subcommand(
            installation_args(Command::new("generate-unit").about("Prints the systemd unit"))
                .arg(Arg::new("output").short('o').long("output").value_name("FILE").help("Write the unit to FILE").action(ArgAction::Set))
        );
    debug!("✅ CLI interface built in {:?}", start_time.elapsed());
    cmd
}

/// Layer of configuration values given on the command line.
pub fn collect_overrides(matches: &ArgMatches) -> CliOverrides {
    let mut cli = CliOverrides::new();
    cli.put_opt("camera", "device", matches.get_one::<String>("device").cloned());
    cli.put_opt("camera", "width", matches.get_one::<u32>("width").copied());
    cli.put_opt("camera", "height", matches.get_one::<u32>("height").copied());
    cli.put_opt("camera", "framerate", matches.get_one::<u32>("framerate").copied());
    if matches.get_flag("no-preflight") {
        cli.put("camera", "preflight", false);
    }
    cli.put_opt("encoding", "codec", matches.get_one::<String>("codec").cloned());
    cli.put_opt("encoding", "bitrate_kbps", matches.get_one::<u32>("bitrate-kbps").copied());
    cli.put_opt("rtsp", "mount_path", matches.get_one::<String>("mount-path").cloned());
    cli.put_opt("rtsp", "port", matches.get_one::<u16>("port").copied());
    cli.put_opt("rtsp", "backend", matches.get_one::<String>("backend").cloned());
    cli.put_opt("health", "health_port", matches.get_one::<u16>("health-port").copied());
    cli.put_opt("health", "metrics_port", matches.get_one::<u16>("metrics-port").copied());
    cli.put_opt("logging", "log_file", matches.get_one::<String>("log-file").cloned());
    if matches.get_flag("verbose") {
        cli.put("logging", "verbose", true);
    }
    if let Some(gst_debug) = matches.get_one::<String>("gst-debug") {
        match gst_debug.trim().parse::<u32>() {
            Ok(level) => cli.put("logging", "gst_debug_level", level),
            Err(_) => cli.put("logging", "gst_debug_categories", gst_debug.trim()),
        }
    }
    cli.put_opt("logging", "gst_debug_file", matches.get_one::<String>("gst-debug-file").cloned());
    cli
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::{build_config, ConfigFileOrigin};

    fn resolve(args: &[&str]) -> crate::app_config::AppConfig {
        let matches = build_cli().try_get_matches_from(args).unwrap();
        let sub = matches.subcommand().map(|(_, m)| m).unwrap_or(&matches);
        build_config(None, ConfigFileOrigin::Default, Vec::<(String, String)>::new(), &collect_overrides(sub)).unwrap()
    }

    #[test]
    fn flags_after_subcommand_become_overrides() {
        let config = resolve(&["cam-rtsp", "run", "--port", "9554", "--codec", "jpeg", "--no-preflight", "--gst-debug", "3"]);
        assert_eq!(config.rtsp.port, 9554);
        assert_eq!(config.encoding.codec, crate::app_config::CodecMode::Mjpeg);
        assert!(!config.camera.preflight);
        assert_eq!(config.logging.gst_debug_level, 3);
    }

    #[test]
    fn flags_before_subcommand_and_categories() {
        let config = resolve(&["cam-rtsp", "--mount-path", "live", "--gst-debug", "rtsp*:5", "dump-config"]);
        assert_eq!(config.rtsp.mount_path, "/live");
        assert_eq!(config.logging.gst_debug_categories, "rtsp*:5");
    }

    #[test]
    fn no_flags_no_overrides() {
        let matches = build_cli().try_get_matches_from(["cam-rtsp"]).unwrap();
        assert!(collect_overrides(&matches).is_empty());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(build_cli().try_get_matches_from(["cam-rtsp", "--backend", "vlc"]).is_err());
    }
}
