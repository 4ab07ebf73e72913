use crate::common::file_utils::write_if_changed;
use crate::core::installer::{install, uninstall, HostSystem, ServiceInstallation};
use anyhow::{Context, Result};
use clap::ArgMatches;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

fn installation_from_args(args: &ArgMatches) -> Result<ServiceInstallation> {
    let defaults = ServiceInstallation::default();
    let get = |name: &str| args.get_one::<String>(name).cloned();
    let executable = match get("exe") {
        Some(exe) => PathBuf::from(exe),
        None => std::env::current_exe().context("Cannot determine the path of this executable")?,
    };
    Ok(ServiceInstallation {
        prefix: get("prefix").map(PathBuf::from).unwrap_or(defaults.prefix),
        service_user: get("user").unwrap_or(defaults.service_user),
        unit_name: get("unit-name").unwrap_or(defaults.unit_name),
        unit_dir: get("unit-dir").map(PathBuf::from).unwrap_or(defaults.unit_dir),
        executable,
    })
}

pub fn handle_install_cli(args: &ArgMatches) -> Result<()> {
    let start_time = Instant::now();
    let installation = installation_from_args(args)?;
    let report = install(&installation, &HostSystem, !args.get_flag("no-user"), !args.get_flag("no-enable"))
        .context("Installation failed")?;
    println!("{}", serde_yaml::to_string(&report)?.trim_end());
    info!("✅ Installed into {} in {:?}", installation.prefix.display(), start_time.elapsed());
    Ok(())
}

pub fn handle_uninstall_cli(args: &ArgMatches) -> Result<()> {
    let installation = installation_from_args(args)?;
    uninstall(&installation, &HostSystem, args.get_flag("purge"), args.get_flag("remove-user"))
        .context("Uninstall failed")?;
    info!("✅ Uninstalled {}", installation.unit_name);
    Ok(())
}

pub fn handle_generate_unit_cli(args: &ArgMatches) -> Result<()> {
    let installation = installation_from_args(args)?;
    let unit = installation.render_unit()?;
    match args.get_one::<String>("output") {
        Some(path) => {
            let outcome = write_if_changed(&PathBuf::from(path), &unit)?;
            info!("Unit written to {} ({:?})", path, outcome);
        }
        None => print!("{}", unit),
    }
    Ok(())
}
