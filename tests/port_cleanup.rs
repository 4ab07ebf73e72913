use camrtsp::core::port_cleanup::{free_port, port_is_free, CleanupPolicy, PortOwners};
use camrtsp::errors::AppError;
use std::net::TcpListener;
use std::sync::Mutex;
use std::time::Duration;

const FAKE_PID: i32 = 4242;

/// Stands in for another process holding the port: SIGTERM drops the
/// listener unless `stubborn`.
struct SimulatedOwner {
    listener: Mutex<Option<TcpListener>>,
    stubborn: bool,
    signals: Mutex<Vec<(i32, bool)>>,
}

impl SimulatedOwner {
    fn bind(stubborn: bool) -> (Self, u16) {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let owner = SimulatedOwner { listener: Mutex::new(Some(listener)), stubborn, signals: Mutex::new(Vec::new()) };
        (owner, port)
    }
}

impl PortOwners for SimulatedOwner {
    fn listener_pids(&self, _port: u16) -> Vec<i32> {
        if self.listener.lock().unwrap().is_some() {
            vec![FAKE_PID]
        } else {
            Vec::new()
        }
    }

    fn signal(&self, pid: i32, force: bool) -> Result<(), String> {
        self.signals.lock().unwrap().push((pid, force));
        if !self.stubborn {
            self.listener.lock().unwrap().take();
        }
        Ok(())
    }
}

fn policy(grace_ms: u64, timeout_ms: u64) -> CleanupPolicy {
    CleanupPolicy {
        grace: Duration::from_millis(grace_ms),
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn busy_port_is_released_after_sigterm() {
    let (owner, port) = SimulatedOwner::bind(false);
    assert!(!port_is_free(port));

    let report = free_port(port, &owner, policy(500, 3000)).await.unwrap();
    assert_eq!(report.terminated, vec![FAKE_PID]);
    assert!(report.killed.is_empty());
    assert_eq!(*owner.signals.lock().unwrap(), vec![(FAKE_PID, false)]);
    assert!(port_is_free(port));
}

#[tokio::test]
async fn stubborn_listener_escalates_then_times_out() {
    let (owner, port) = SimulatedOwner::bind(true);

    let err = free_port(port, &owner, policy(100, 500)).await.unwrap_err();
    match err {
        AppError::PortBusyTimeout { port: p, waited_ms } => {
            assert_eq!(p, port);
            assert!(waited_ms >= 500);
        }
        other => panic!("unexpected error {:?}", other),
    }
    let signals = owner.signals.lock().unwrap().clone();
    assert_eq!(signals.first(), Some(&(FAKE_PID, false)));
    assert!(signals.contains(&(FAKE_PID, true)));
}

#[tokio::test]
async fn free_port_sends_no_signals() {
    let (owner, _) = SimulatedOwner::bind(false);
    let port = {
        let l = TcpListener::bind("0.0.0.0:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let report = free_port(port, &owner, policy(100, 500)).await.unwrap();
    assert!(report.terminated.is_empty());
    assert!(owner.signals.lock().unwrap().is_empty());
}
