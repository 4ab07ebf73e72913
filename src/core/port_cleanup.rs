use crate::errors::AppError;
use log::{debug, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const TCP_LISTEN_STATE: &str = "0A";

/// Finds and signals the processes holding a TCP port.
pub trait PortOwners: Send + Sync {
    fn listener_pids(&self, port: u16) -> Vec<i32>;
    /// SIGTERM, or SIGKILL when `force`.
    fn signal(&self, pid: i32, force: bool) -> Result<(), String>;
}

/// Reads `/proc/net/tcp{,6}` for listening sockets and maps their inodes to
/// pids through `/proc/<pid>/fd`.
pub struct ProcNetOwners {
    proc_root: PathBuf,
}

impl Default for ProcNetOwners {
    fn default() -> Self {
        ProcNetOwners { proc_root: PathBuf::from("/proc") }
    }
}

impl ProcNetOwners {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        ProcNetOwners { proc_root: proc_root.into() }
    }

    fn listening_inodes(&self, port: u16) -> BTreeSet<u64> {
        let mut inodes = BTreeSet::new();
        for table in ["net/tcp", "net/tcp6"] {
            if let Ok(content) = fs::read_to_string(self.proc_root.join(table)) {
                inodes.extend(parse_listening_inodes(&content, port));
            }
        }
        inodes
    }
}

impl PortOwners for ProcNetOwners {
    fn listener_pids(&self, port: u16) -> Vec<i32> {
        let inodes = self.listening_inodes(port);
        if inodes.is_empty() {
            return Vec::new();
        }
        let own_pid = std::process::id() as i32;
        let mut pids = Vec::new();
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(e) => {
                debug!("Cannot read {}: {}", self.proc_root.display(), e);
                return pids;
            }
        };
        for entry in entries.flatten() {
            let pid: i32 = match entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                Some(p) => p,
                None => continue,
            };
            if pid == own_pid {
                continue;
            }
            // other users' fds are unreadable without privileges
            let fds = match fs::read_dir(entry.path().join("fd")) {
                Ok(f) => f,
                Err(_) => continue,
            };
            let holds_socket = fds.flatten().any(|fd| {
                fs::read_link(fd.path())
                    .ok()
                    .and_then(|target| socket_inode(&target.to_string_lossy()))
                    .map_or(false, |inode| inodes.contains(&inode))
            });
            if holds_socket {
                pids.push(pid);
            }
        }
        pids
    }

    fn signal(&self, pid: i32, force: bool) -> Result<(), String> {
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        kill(Pid::from_raw(pid), sig).map_err(|e| e.to_string())
    }
}

/// Inodes of sockets in LISTEN state on `port` from a `/proc/net/tcp` table.
pub fn parse_listening_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN_STATE {
                return None;
            }
            let local_port = fields[1].rsplit(':').next()?;
            if u16::from_str_radix(local_port, 16).ok()? != port {
                return None;
            }
            fields[9].parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}

fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// True when wildcard binds on `port` succeed for IPv4 and, where the host
/// has IPv6, for IPv6.
pub fn port_is_free(port: u16) -> bool {
    if TcpListener::bind(("0.0.0.0", port)).is_err() {
        return false;
    }
    match TcpListener::bind(("::", port)) {
        Ok(_) => true,
        Err(e) => e.kind() != ErrorKind::AddrInUse,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    pub grace: Duration,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub terminated: Vec<i32>,
    pub killed: Vec<i32>,
    pub waited: Duration,
}

/// Signals whatever holds `port`, escalates to SIGKILL after the grace window
/// and polls until the port binds or the timeout expires.
pub async fn free_port(port: u16, owners: &dyn PortOwners, policy: CleanupPolicy) -> Result<CleanupReport, AppError> {
    let start_time = Instant::now();
    let mut report = CleanupReport::default();
    if port_is_free(port) {
        debug!("Port {} already free", port);
        return Ok(report);
    }

    let pids = owners.listener_pids(port);
    if pids.is_empty() {
        warn!("Port {} is busy but no owning process is visible; waiting for it to free", port);
    }
    for pid in pids {
        info!("🧹 Sending SIGTERM to pid {} holding port {}", pid, port);
        match owners.signal(pid, false) {
            Ok(()) => report.terminated.push(pid),
            Err(e) => warn!("SIGTERM to pid {} failed: {}", pid, e),
        }
    }

    let mut escalated = false;
    loop {
        tokio::time::sleep(policy.poll_interval).await;
        let elapsed = start_time.elapsed();
        if port_is_free(port) {
            report.waited = elapsed;
            info!("✅ Port {} free after {:?}", port, elapsed);
            return Ok(report);
        }
        if !escalated && elapsed >= policy.grace {
            escalated = true;
            for pid in owners.listener_pids(port) {
                warn!("Pid {} still holds port {} after {:?}; sending SIGKILL", pid, port, policy.grace);
                match owners.signal(pid, true) {
                    Ok(()) => report.killed.push(pid),
                    Err(e) => warn!("SIGKILL to pid {} failed: {}", pid, e),
                }
            }
        }
        if elapsed >= policy.timeout {
            return Err(AppError::PortBusyTimeout { port, waited_ms: elapsed.as_millis() as u64 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:216A 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41234 1 0000000000000000 100 0 0 10 0
   1: 0100007F:216A 0100007F:A1B2 01 00000000:00000000 00:00000000 00000000  1000        0 51234 1 0000000000000000 20 4 30 10 -1
   2: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 777 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn parses_only_listening_sockets_on_port() {
        // 0x216A = 8554
        assert_eq!(parse_listening_inodes(TABLE, 8554), vec![41234]);
        assert_eq!(parse_listening_inodes(TABLE, 8080), vec![777]);
        assert!(parse_listening_inodes(TABLE, 9000).is_empty());
    }

    #[test]
    fn socket_link_inode() {
        assert_eq!(socket_inode("socket:[41234]"), Some(41234));
        assert_eq!(socket_inode("/dev/null"), None);
        assert_eq!(socket_inode("pipe:[12]"), None);
    }

    #[test]
    fn maps_inodes_through_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("net")).unwrap();
        fs::write(root.join("net/tcp"), TABLE).unwrap();
        fs::create_dir_all(root.join("4242/fd")).unwrap();
        std::os::unix::fs::symlink("socket:[41234]", root.join("4242/fd/3")).unwrap();
        fs::create_dir_all(root.join("4343/fd")).unwrap();
        std::os::unix::fs::symlink("socket:[999]", root.join("4343/fd/3")).unwrap();
        fs::create_dir_all(root.join("self")).unwrap();

        let owners = ProcNetOwners::new(root);
        assert_eq!(owners.listener_pids(8554), vec![4242]);
        assert!(owners.listener_pids(1234).is_empty());
    }

    #[test]
    fn ipv6_only_listener_keeps_port_busy() {
        // hosts without IPv6 loopback have nothing to check
        let Ok(listener) = TcpListener::bind("[::1]:0") else { return };
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_free(port));
        drop(listener);
        assert!(port_is_free(port));
    }
}
