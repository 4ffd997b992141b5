//! D-Bus proxy launcher (§4.9): forks the proxy binary, waits for its UNIX
//! socket to appear with a bounded timeout.
//!
//! Grounded in `original_source`'s `StartDbusProxy` for the argv shape and
//! in the teacher's fork/exec idiom for the process plumbing (`process.rs`).
//! The poll loop is new — the teacher's sandbox has no companion process to
//! rendezvous with.

use std::path::Path;
use std::time::{Duration, Instant};

use nix::unistd::{fork, ForkResult};

use crate::config::DbusProxyInfo;
use crate::platform::{exec, set_parent_death_signal};
use crate::Error;

const PROXY_BINARY: &str = "/usr/bin/ll-dbus-proxy";
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Forks and execs the proxy binary per §4.9 step 2, then polls for
/// `proxy_path` to exist (step 3). Returns once the socket is visible, or an
/// error once `timeout` elapses without it appearing — the caller must not
/// start the payload in that case (§7: "D-Bus proxy timeout").
pub fn start(info: &DbusProxyInfo, timeout: Duration) -> Result<(), Error> {
    // SAFETY: the child only calls async-signal-safe functions before exec.
    match unsafe { fork() }? {
        ForkResult::Child => {
            let _ = set_parent_death_signal();
            let argv = vec![
                PROXY_BINARY.to_string(),
                info.app_id.clone(),
                info.bus_type.clone(),
                info.proxy_path.to_string_lossy().into_owned(),
                info.name.join(","),
                info.path.join(","),
                info.interface.join(","),
            ];
            let env: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = exec(&argv, &env);
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { .. } => wait_for_socket(&info.proxy_path, timeout),
    }
}

/// Starts the proxy with the default 5-second bound.
pub fn start_default(info: &DbusProxyInfo) -> Result<(), Error> {
    start(info, DEFAULT_TIMEOUT)
}

fn wait_for_socket(path: &Path, timeout: Duration) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if path.try_exists().unwrap_or(false) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(format!("dbus proxy socket {path:?} did not appear within {timeout:?}").into());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_socket_times_out_when_path_never_appears() {
        let missing = Path::new("/nonexistent/ll-box-test-socket");
        let err = wait_for_socket(missing, Duration::from_millis(50));
        assert!(err.is_err());
    }

    #[test]
    fn wait_for_socket_succeeds_once_path_exists() {
        let dir = std::env::temp_dir().join(format!("ll-box-dbus-test-{}", std::process::id()));
        std::fs::write(&dir, b"").unwrap();
        let result = wait_for_socket(&dir, Duration::from_millis(50));
        let _ = std::fs::remove_file(&dir);
        assert!(result.is_ok());
    }
}
