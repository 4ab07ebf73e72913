use anyhow::{bail, Context, Result};
use camrtsp::cli;
use camrtsp::common::logging_setup;
use camrtsp::config_loader::{self, ConfigFileOrigin};
use camrtsp::errors::exit_code_for;
use camrtsp::operations;
use log::{debug, error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

async fn run() -> Result<()> {
    let main_start_time = Instant::now();
    let matches = cli::build_cli().get_matches();
    let debug_flag = matches.get_flag("debug");
    let (sub_name, sub_matches) = match matches.subcommand() {
        Some((name, sub)) => (name, Some(sub)),
        None => ("run", None),
    };
    let arg_source = sub_matches.unwrap_or(&matches);

    let (config_path, origin) = match arg_source.get_one::<String>("config") {
        Some(p) => (PathBuf::from(p), ConfigFileOrigin::Explicit),
        None => (PathBuf::from(config_loader::DEFAULT_CONFIG_PATH), ConfigFileOrigin::Default),
    };
    let overrides = cli::collect_overrides(arg_source);
    let config_load_start_time = Instant::now();
    let config = match config_loader::build_config(Some(&config_path), origin, std::env::vars(), &overrides) {
        Ok(cfg) => {
            logging_setup::initialize_logging(Some(&cfg.logging), debug_flag)
                .context("Failed to initialize logging with full config")?;
            debug!("✅ Configuration resolved in {:?}", config_load_start_time.elapsed());
            cfg
        }
        Err(e) => {
            logging_setup::initialize_logging(None, debug_flag)
                .context("Failed to initialize logging with basic settings after config load failure")?;
            error!("❌ Failed to load configuration from '{}': {:#}", config_path.display(), e);
            return Err(e.context(format!("Failed to load configuration from '{}'", config_path.display())));
        }
    };

    info!("🚀 cam-rtsp {} starting ({})", env!("CARGO_PKG_VERSION"), sub_name);
    let op_start_time = Instant::now();
    let op_result: Result<()> = match (sub_name, sub_matches) {
        ("run", args) => operations::run_op::handle_run_cli(&config, args).await,
        ("list-devices", _) => operations::devices_op::handle_list_devices_cli(config.logging.verbose).await,
        ("print-pipeline", _) => operations::config_op::handle_print_pipeline_cli(&config).await,
        ("preflight", _) => operations::preflight_op::handle_preflight_cli(&config).await,
        ("dump-config", _) => operations::config_op::handle_dump_config_cli(&config),
        ("probe", Some(args)) => operations::probe_op::handle_probe_cli(&config, args).await,
        ("install", Some(args)) => operations::install_op::handle_install_cli(args),
        ("uninstall", Some(args)) => operations::install_op::handle_uninstall_cli(args),
        ("generate-unit", Some(args)) => operations::install_op::handle_generate_unit_cli(args),
        (other, _) => bail!("Subcommand '{}' not implemented.", other),
    };

    if let Err(e) = op_result {
        error!("❌ Operation '{}' failed after {:?}: {:#}", sub_name, op_start_time.elapsed(), e);
        return Err(e);
    }
    info!("🏁 '{}' finished in {:?}.", sub_name, main_start_time.elapsed());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
