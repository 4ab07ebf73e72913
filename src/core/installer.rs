use crate::app_config::AppConfig;
use crate::common::file_utils::{ensure_directory, write_if_absent, write_if_changed, WriteOutcome};
use crate::core::stream_config::{validate_path_value, validate_word};
use crate::errors::AppError;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_PREFIX: &str = "/opt/camrtsp";
pub const DEFAULT_SERVICE_USER: &str = "camrtsp";
pub const DEFAULT_UNIT_NAME: &str = "camrtsp.service";
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Account, unit and service manager operations. Faked in tests.
pub trait SystemOps {
    fn user_exists(&self, name: &str) -> Result<bool, AppError>;
    fn create_user(&self, name: &str, home: &Path) -> Result<(), AppError>;
    fn remove_user(&self, name: &str) -> Result<(), AppError>;
    fn chown(&self, path: &Path, user: &str) -> Result<(), AppError>;
    fn systemctl(&self, args: &[&str]) -> Result<(), AppError>;
}

/// Runs `id`, `useradd`, `userdel`, `chown` and `systemctl`.
pub struct HostSystem;

fn run_command(program: &str, args: &[&str]) -> Result<std::process::Output, AppError> {
    debug!("Running {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AppError::Install(format!("Failed to run {}: {}", program, e)))
}

fn run_checked(program: &str, args: &[&str]) -> Result<(), AppError> {
    let output = run_command(program, args)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Install(format!(
            "{} {} failed ({}): {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl SystemOps for HostSystem {
    fn user_exists(&self, name: &str) -> Result<bool, AppError> {
        Ok(run_command("id", &["-u", name])?.status.success())
    }

    fn create_user(&self, name: &str, home: &Path) -> Result<(), AppError> {
        let home = home.display().to_string();
        run_checked(
            "useradd",
            &["--system", "--home-dir", &home, "--shell", "/usr/sbin/nologin", "--groups", "video", name],
        )
    }

    fn remove_user(&self, name: &str) -> Result<(), AppError> {
        run_checked("userdel", &[name])
    }

    fn chown(&self, path: &Path, user: &str) -> Result<(), AppError> {
        let owner = format!("{}:{}", user, user);
        let path = path.display().to_string();
        run_checked("chown", &["-R", &owner, &path])
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), AppError> {
        run_checked("systemctl", args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInstallation {
    pub prefix: PathBuf,
    pub service_user: String,
    pub unit_name: String,
    pub unit_dir: PathBuf,
    /// Binary the unit's ExecStart points at.
    pub executable: PathBuf,
}

impl Default for ServiceInstallation {
    fn default() -> Self {
        ServiceInstallation {
            prefix: PathBuf::from(DEFAULT_PREFIX),
            service_user: DEFAULT_SERVICE_USER.to_string(),
            unit_name: DEFAULT_UNIT_NAME.to_string(),
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            executable: PathBuf::from("/usr/local/bin/cam-rtsp"),
        }
    }
}

impl ServiceInstallation {
    pub fn config_path(&self) -> PathBuf {
        self.prefix.join(CONFIG_FILE_NAME)
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.unit_name)
    }

    fn validate(&self) -> Result<(), AppError> {
        validate_word("install.user", &self.service_user)?;
        validate_word("install.unit", &self.unit_name)?;
        validate_path_value("install.prefix", &self.prefix.display().to_string())?;
        validate_path_value("install.executable", &self.executable.display().to_string())?;
        Ok(())
    }

    /// systemd unit running `cam-rtsp run` with restart-on-failure.
    pub fn render_unit(&self) -> Result<String, AppError> {
        self.validate()?;
        Ok(format!(
            "[Unit]
Description=USB camera RTSP stream (cam-rtsp)
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={user}
Group={user}
SupplementaryGroups=video
WorkingDirectory={prefix}
Environment=CAMRTSP_LOGGING__LEVEL=info
ExecStart={exe} run -c {config}
Restart=on-failure
RestartSec=3
KillSignal=SIGTERM
TimeoutStopSec=10

[Install]
WantedBy=multi-user.target
",
            user = self.service_user,
            prefix = self.prefix.display(),
            exe = self.executable.display(),
            config = self.config_path().display(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallReport {
    pub user_created: bool,
    pub config: String,
    pub unit: String,
}

fn outcome_label(outcome: WriteOutcome) -> String {
    match outcome {
        WriteOutcome::Created => "created",
        WriteOutcome::Updated => "updated",
        WriteOutcome::Unchanged => "unchanged",
    }
    .to_string()
}

/// Creates the account, prefix, default config (never overwritten) and unit.
/// Re-running with the same arguments changes nothing.
pub fn install(
    installation: &ServiceInstallation,
    ops: &dyn SystemOps,
    manage_user: bool,
    enable: bool,
) -> Result<InstallReport, AppError> {
    installation.validate()?;
    let mut user_created = false;
    if manage_user {
        if ops.user_exists(&installation.service_user)? {
            debug!("User {} already exists", installation.service_user);
        } else {
            info!("👤 Creating service user {}", installation.service_user);
            ops.create_user(&installation.service_user, &installation.prefix)?;
            user_created = true;
        }
    }

    ensure_directory(&installation.prefix)?;
    let default_yaml = AppConfig::default()
        .to_yaml()
        .map_err(|e| AppError::Install(format!("Failed to render default config: {:#}", e)))?;
    let config_outcome = write_if_absent(&installation.config_path(), &default_yaml)?;
    if manage_user {
        ops.chown(&installation.prefix, &installation.service_user)?;
    }

    let unit_outcome = write_if_changed(&installation.unit_path(), &installation.render_unit()?)?;
    info!(
        "Config {} ({}), unit {} ({})",
        installation.config_path().display(),
        outcome_label(config_outcome),
        installation.unit_path().display(),
        outcome_label(unit_outcome)
    );
    if unit_outcome != WriteOutcome::Unchanged {
        ops.systemctl(&["daemon-reload"])?;
    }
    if enable {
        ops.systemctl(&["enable", "--now", &installation.unit_name])?;
        info!("✅ {} enabled and started", installation.unit_name);
    }

    Ok(InstallReport {
        user_created,
        config: outcome_label(config_outcome),
        unit: outcome_label(unit_outcome),
    })
}

/// Stops and disables the unit and removes it. `purge` also deletes the prefix.
pub fn uninstall(
    installation: &ServiceInstallation,
    ops: &dyn SystemOps,
    purge: bool,
    remove_user: bool,
) -> Result<(), AppError> {
    installation.validate()?;
    for action in ["stop", "disable"] {
        // a unit that was never installed cannot be stopped
        if let Err(e) = ops.systemctl(&[action, &installation.unit_name]) {
            warn!("systemctl {} {}: {}", action, installation.unit_name, e);
        }
    }

    let unit_path = installation.unit_path();
    if unit_path.exists() {
        fs::remove_file(&unit_path)
            .map_err(|e| AppError::Install(format!("Failed to remove {}: {}", unit_path.display(), e)))?;
        info!("Removed {}", unit_path.display());
        ops.systemctl(&["daemon-reload"])?;
    }

    if purge && installation.prefix.exists() {
        fs::remove_dir_all(&installation.prefix).map_err(|e| {
            AppError::Install(format!("Failed to remove {}: {}", installation.prefix.display(), e))
        })?;
        info!("Purged {}", installation.prefix.display());
    }

    if remove_user && ops.user_exists(&installation.service_user)? {
        ops.remove_user(&installation.service_user)?;
        info!("Removed user {}", installation.service_user);
    }
    Ok(())
}
