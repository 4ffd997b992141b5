//! Stack-allocated clone, exec, and the two wait modes (§4.1).

use std::ffi::CString;
use std::os::fd::RawFd;

use nix::sched::{clone, CloneFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvpe, Pid};

use crate::Error;

const STACK_SIZE: usize = 1024 * 1024;

/// Invokes the kernel clone on a freshly allocated, anonymous 1 MiB stack.
///
/// `callback` runs in the child with its own stack and returns an exit code
/// (only meaningful if it somehow returns instead of exec'ing or `_exit`ing).
pub fn clone_child<F: FnMut() -> isize>(
    mut callback: F,
    flags: CloneFlags,
) -> Result<Pid, Error> {
    let mut stack = vec![0u8; STACK_SIZE];
    // SAFETY: `stack` outlives the call (clone blocks in the parent only long
    // enough to return the child pid; the address space is shared with the
    // child until it execs or exits, so the stack must stay mapped until then,
    // which `clone` guarantees by not returning to the parent until the child
    // has its own return address on it).
    let pid = unsafe { clone(Box::new(&mut callback), &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|v| format!("clone failed: {v}"))?;
    Ok(pid)
}

/// Resolves `argv[0]` through `PATH` and replaces the current process image.
/// Never returns on success.
pub fn exec(argv: &[String], envp: &[String]) -> Result<std::convert::Infallible, Error> {
    let filename = CString::new(argv[0].as_bytes())?;
    let argv = Result::<Vec<_>, _>::from_iter(argv.iter().map(|v| CString::new(v.as_bytes())))?;
    let envp = Result::<Vec<_>, _>::from_iter(envp.iter().map(|v| CString::new(v.as_bytes())))?;
    Ok(execvpe(&filename, &argv, &envp)?)
}

pub enum WaitMode {
    /// Reap children until `target` is reaped, then return its disposition.
    Target(Pid),
    /// Reap children until `waitpid` reports `ECHILD`.
    DrainAll,
}

/// Returns `0` if the target exited normally with status `0`, `-1` otherwise.
/// Intermediate (non-target) children are logged at info, abnormal exits at
/// warning.
pub fn wait(mode: WaitMode) -> i32 {
    match mode {
        WaitMode::Target(target) => loop {
            match waitpid(None, Some(WaitPidFlag::__WALL)) {
                Ok(status) => {
                    let pid = status_pid(&status);
                    let (normal, text) = parse_wstatus(&status);
                    if pid == Some(target) {
                        if normal {
                            tracing::info!(%target, "target process exited normally");
                        } else {
                            tracing::warn!(%target, %text, "target process exited abnormally");
                        }
                        return if normal { 0 } else { -1 };
                    } else {
                        tracing::info!(?pid, %text, "reaped intermediate child");
                    }
                }
                Err(nix::errno::Errno::ECHILD) => return -1,
                Err(err) => {
                    tracing::warn!(%err, "waitpid failed");
                    return -1;
                }
            }
        },
        WaitMode::DrainAll => {
            let mut last = 0;
            loop {
                match waitpid(None, Some(WaitPidFlag::__WALL)) {
                    Ok(status) => {
                        let (normal, text) = parse_wstatus(&status);
                        if !normal {
                            tracing::warn!(%text, "child exited abnormally");
                            last = -1;
                        }
                    }
                    Err(nix::errno::Errno::ECHILD) => return last,
                    Err(err) => {
                        tracing::warn!(%err, "waitpid failed");
                        return -1;
                    }
                }
            }
        }
    }
}

fn status_pid(status: &WaitStatus) -> Option<Pid> {
    match status {
        WaitStatus::Exited(pid, _) => Some(*pid),
        WaitStatus::Signaled(pid, _, _) => Some(*pid),
        WaitStatus::Stopped(pid, _) => Some(*pid),
        WaitStatus::Continued(pid) => Some(*pid),
        _ => None,
    }
}

/// `(normal, human_string)`; normal iff `WIFEXITED` and `WEXITSTATUS == 0`.
pub fn parse_wstatus(status: &WaitStatus) -> (bool, String) {
    match status {
        WaitStatus::Exited(pid, 0) => (true, format!("{pid} exited with status 0")),
        WaitStatus::Exited(pid, code) => (false, format!("{pid} exited with status {code}")),
        WaitStatus::Signaled(pid, sig, _) => (false, format!("{pid} killed by signal {sig}")),
        other => (false, format!("{other:?}")),
    }
}

/// Sets `PR_SET_PDEATHSIG=SIGKILL` on the current process, the only
/// cancellation mechanism this crate relies on: if a parent process dies
/// before signalling a sibling's semaphore, the kernel kills the orphan.
pub fn set_parent_death_signal() -> Result<(), Error> {
    let res = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    nix::errno::Errno::result(res).map_err(|v| format!("prctl(PR_SET_PDEATHSIG) failed: {v}"))?;
    Ok(())
}

/// Clears supplementary groups and sets the effective uid back to the real
/// uid, but only if the effective uid is currently root (§4.8 Phase A step
/// 9 / Phase B step 14: "clear supplementary groups if effective-uid 0, set
/// effective uid to real uid").
pub fn drop_privileges() -> Result<(), Error> {
    use nix::unistd::{geteuid, getuid, seteuid, setgroups};
    if geteuid().is_root() {
        setgroups(&[])?;
        seteuid(getuid())?;
    }
    Ok(())
}

/// Sets the effective uid to `uid` (§4.8 Phase C step 4's "set effective uid
/// to 0" before installing a seccomp filter).
pub fn set_effective_uid(uid: nix::unistd::Uid) -> Result<(), Error> {
    Ok(nix::unistd::seteuid(uid)?)
}

/// Closes every open file descriptor numbered `from` and above, skipping
/// ones already marked close-on-exec. Entry/payload processes call this
/// before exec'ing the user command so inherited pipe/semaphore descriptors
/// don't leak into it.
pub fn close_exec_from(from: RawFd) -> Result<(), Error> {
    let proc_fd = std::fs::read_dir("/proc/self/fd")?;
    for entry in proc_fd {
        let entry = entry?;
        let fd: RawFd = match entry.file_name().to_str().and_then(|v| v.parse().ok()) {
            Some(v) => v,
            None => continue,
        };
        if fd < from {
            continue;
        }
        let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD);
        if let Ok(flags) = flags {
            if nix::fcntl::FdFlag::from_bits_truncate(flags)
                .contains(nix::fcntl::FdFlag::FD_CLOEXEC)
            {
                continue;
            }
        }
        let _ = nix::unistd::close(fd);
    }
    Ok(())
}
