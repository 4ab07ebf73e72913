use camrtsp::core::installer::{install, uninstall, ServiceInstallation, SystemOps};
use camrtsp::errors::AppError;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
struct FakeSystem {
    users: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSystem {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SystemOps for FakeSystem {
    fn user_exists(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.users.lock().unwrap().contains(name))
    }

    fn create_user(&self, name: &str, _home: &Path) -> Result<(), AppError> {
        self.record(format!("useradd {}", name));
        self.users.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    fn remove_user(&self, name: &str) -> Result<(), AppError> {
        self.record(format!("userdel {}", name));
        self.users.lock().unwrap().remove(name);
        Ok(())
    }

    fn chown(&self, _path: &Path, user: &str) -> Result<(), AppError> {
        self.record(format!("chown {}", user));
        Ok(())
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), AppError> {
        self.record(format!("systemctl {}", args.join(" ")));
        Ok(())
    }
}

fn installation(root: &Path) -> ServiceInstallation {
    ServiceInstallation {
        prefix: root.join("opt/camrtsp"),
        unit_dir: root.join("etc/systemd/system"),
        executable: "/usr/local/bin/cam-rtsp".into(),
        ..Default::default()
    }
}

#[test]
fn install_twice_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let inst = installation(root.path());
    let system = FakeSystem::default();

    let first = install(&inst, &system, true, true).unwrap();
    assert!(first.user_created);
    assert_eq!(first.config, "created");
    assert_eq!(first.unit, "created");
    let config_after_first = std::fs::read_to_string(inst.config_path()).unwrap();
    let unit_after_first = std::fs::read_to_string(inst.unit_path()).unwrap();

    let second = install(&inst, &system, true, true).unwrap();
    assert!(!second.user_created);
    assert_eq!(second.config, "unchanged");
    assert_eq!(second.unit, "unchanged");

    assert_eq!(system.users.lock().unwrap().len(), 1);
    assert_eq!(std::fs::read_to_string(inst.config_path()).unwrap(), config_after_first);
    assert_eq!(std::fs::read_to_string(inst.unit_path()).unwrap(), unit_after_first);
    let units: Vec<_> = std::fs::read_dir(&inst.unit_dir).unwrap().collect();
    assert_eq!(units.len(), 1);

    let calls = system.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("useradd")).count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "systemctl daemon-reload").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "systemctl enable --now camrtsp.service").count(), 2);
}

#[test]
fn existing_config_is_never_overwritten() {
    let root = tempfile::tempdir().unwrap();
    let inst = installation(root.path());
    std::fs::create_dir_all(&inst.prefix).unwrap();
    std::fs::write(inst.config_path(), "rtsp:\n  port: 9554\n").unwrap();

    let report = install(&inst, &FakeSystem::default(), false, false).unwrap();
    assert_eq!(report.config, "unchanged");
    assert_eq!(std::fs::read_to_string(inst.config_path()).unwrap(), "rtsp:\n  port: 9554\n");
}

#[test]
fn default_config_parses_back() {
    let root = tempfile::tempdir().unwrap();
    let inst = installation(root.path());
    install(&inst, &FakeSystem::default(), false, false).unwrap();
    let text = std::fs::read_to_string(inst.config_path()).unwrap();
    let parsed: camrtsp::app_config::AppConfig = serde_yaml::from_str(&text).unwrap();
    assert_eq!(parsed, camrtsp::app_config::AppConfig::default());
}

#[test]
fn uninstall_removes_everything_and_can_rerun() {
    let root = tempfile::tempdir().unwrap();
    let inst = installation(root.path());
    let system = FakeSystem::default();
    install(&inst, &system, true, true).unwrap();

    uninstall(&inst, &system, true, true).unwrap();
    assert!(!inst.unit_path().exists());
    assert!(!inst.prefix.exists());
    assert!(system.users.lock().unwrap().is_empty());
    let calls = system.calls();
    assert!(calls.contains(&"systemctl stop camrtsp.service".to_string()));
    assert!(calls.contains(&"systemctl disable camrtsp.service".to_string()));

    uninstall(&inst, &system, true, true).unwrap();
}

#[test]
fn uninstall_without_purge_keeps_config() {
    let root = tempfile::tempdir().unwrap();
    let inst = installation(root.path());
    let system = FakeSystem::default();
    install(&inst, &system, false, false).unwrap();

    uninstall(&inst, &system, false, false).unwrap();
    assert!(!inst.unit_path().exists());
    assert!(inst.config_path().exists());
}
