//! Prestart hook runner (§4.7): fork, exec the hook binary, wait, ignoring
//! its exit status beyond reaping.
//!
//! Grounded in the teacher's fork/exec/waitpid shape used throughout
//! `process.rs`/`tasks.rs`, simplified down since a hook needs no namespace
//! entry of its own — it runs inside the payload's already-constructed
//! namespaces.

use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};

use crate::config::Hook;
use crate::platform::{exec, set_parent_death_signal};
use crate::Error;

/// Runs every prestart hook in order. A hook's exit status is reaped but not
/// inspected, matching §4.7's "parent waits for the child and ignores its
/// exit status beyond reaping."
pub fn run_prestart(hooks: &[Hook]) -> Result<(), Error> {
    for hook in hooks {
        run_one(hook)?;
    }
    Ok(())
}

fn run_one(hook: &Hook) -> Result<(), Error> {
    // SAFETY: the child only calls async-signal-safe functions before exec.
    match unsafe { fork() }? {
        ForkResult::Child => {
            let _ = set_parent_death_signal();
            let path = hook.path.to_string_lossy().into_owned();
            let mut argv = Vec::with_capacity(hook.args.len() + 1);
            argv.push(path);
            argv.extend(hook.args.iter().cloned());
            let _ = exec(&argv, &hook.env);
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { child } => {
            let _ = waitpid(child, None);
            Ok(())
        }
    }
}
