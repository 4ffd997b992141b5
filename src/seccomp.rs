//! Seccomp applier (§4.10): a black-box collaborator per §1 — declarative
//! profile in, installed filter out. Installed via `libseccomp`, the
//! published Rust binding for libseccomp2 that every other OCI runtime in
//! this space (e.g. youki) wraps.

use libseccomp::{ScmpAction, ScmpFilterContext, ScmpSyscall};

use crate::config::Seccomp;
use crate::Error;

fn parse_action(name: &str) -> Result<ScmpAction, Error> {
    match name {
        "allow" | "SCMP_ACT_ALLOW" => Ok(ScmpAction::Allow),
        "errno" | "SCMP_ACT_ERRNO" => Ok(ScmpAction::Errno(libc::EPERM)),
        "kill" | "SCMP_ACT_KILL" => Ok(ScmpAction::KillThread),
        "trap" | "SCMP_ACT_TRAP" => Ok(ScmpAction::Trap),
        "log" | "SCMP_ACT_LOG" => Ok(ScmpAction::Log),
        other => Err(format!("unknown seccomp action: {other}").into()),
    }
}

/// Installs `profile` as the current thread/process's seccomp filter.
/// Invoked only from the payload, after prestart hooks and after the
/// privilege drop/raise dance of §4.8 Phase C step 4.
pub fn apply(profile: &Seccomp) -> Result<(), Error> {
    let default_action = parse_action(&profile.default_action)?;
    let mut filter = ScmpFilterContext::new_filter(default_action)
        .map_err(|v| format!("seccomp filter creation failed: {v}"))?;
    for rule in &profile.syscalls {
        let action = parse_action(&rule.action)?;
        for name in &rule.names {
            let syscall = match ScmpSyscall::from_name(name) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(syscall = name, %err, "unknown syscall in seccomp profile, skipping");
                    continue;
                }
            };
            filter
                .add_rule(action, syscall)
                .map_err(|v| format!("seccomp add_rule({name}) failed: {v}"))?;
        }
    }
    filter
        .load()
        .map_err(|v| format!("seccomp filter load failed: {v}").into())
}
