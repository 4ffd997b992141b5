//! Cgroup-v2 configurator (§4.6): creates the cgroup tree, mounts cgroup2,
//! writes memory/cpu limits, and moves the init PID in.
//!
//! Generalizes the teacher's `Cgroup` (which only ever walked an
//! already-mounted hierarchy inherited from the host — `Cgroup::current()`)
//! with the resource-writing behavior `original_source`'s `ConfigCgroupV2`
//! performs, including the clamp-at-zero fix for `memory.swap.max` that §9
//! calls out as a bug in the original.

use std::fs::{create_dir_all, File, Permissions};
use std::io::{ErrorKind, Write as _};
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};
use nix::unistd::Pid;

use crate::config::Resources;
use crate::error::ignore_kind;
use crate::Error;

const SUBGROUP: &str = "ll-box";

/// Linear remap of the OCI `cpu.shares` range `[2, 262144]` to the cgroup-v2
/// `cpu.weight` range `[1, 10000]` (§4.6 step 5, §8 invariant 5). Values
/// outside the input range clamp into the output range after the formula.
pub fn cpu_weight(shares: u64) -> u64 {
    let shares = shares.clamp(2, 262144);
    1 + ((shares - 2) * 9999) / 262142
}

/// `swap - limit`, clamped at 0 (§9 open question: the original writes a
/// negative value verbatim when `swap < limit`).
fn swap_max(swap: i64, limit: i64) -> i64 {
    let value = swap - limit;
    if value < 0 {
        tracing::warn!(swap, limit, "memory.swap.max would be negative, clamping to 0");
        0
    } else {
        value
    }
}

/// Configures the cgroup-v2 tree for `cgroups_path` and moves `init_pid`
/// into it. No-op if `cgroups_path` is empty (§4.6 step 1).
pub fn configure(cgroups_path: &str, resources: &Resources, init_pid: Pid) -> Result<(), Error> {
    if cgroups_path.is_empty() {
        return Ok(());
    }
    let root = PathBuf::from(cgroups_path);
    ignore_kind(
        create_dir_all(&root),
        ErrorKind::AlreadyExists,
    )?;
    std::fs::set_permissions(&root, Permissions::from_mode(0o755))?;
    mount(
        Some("cgroup2"),
        &root,
        Some("cgroup2"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|v| format!("mount cgroup2 on {root:?} failed: {v}"))?;

    let subgroup = root.join(SUBGROUP);
    ignore_kind(
        create_dir_all(&subgroup),
        ErrorKind::AlreadyExists,
    )?;

    if resources.memory.limit > 0 {
        write_file(&subgroup, "memory.max", resources.memory.limit.to_string())?;
        write_file(
            &subgroup,
            "memory.swap.max",
            swap_max(resources.memory.swap, resources.memory.limit).to_string(),
        )?;
        write_file(
            &subgroup,
            "memory.low",
            resources.memory.reservation.to_string(),
        )?;
    }

    write_file(
        &subgroup,
        "cpu.max",
        format!("{} {}", resources.cpu.quota, resources.cpu.period),
    )?;
    write_file(&subgroup, "cpu.weight", cpu_weight(resources.cpu.shares).to_string())?;

    write_file(&subgroup, "cgroup.procs", init_pid.to_string())?;
    Ok(())
}

fn write_file(dir: &Path, name: &str, value: String) -> Result<(), Error> {
    let path = dir.join(name);
    File::options()
        .write(true)
        .open(&path)
        .map_err(|v| format!("open {path:?} failed: {v}"))?
        .write_all(value.as_bytes())
        .map_err(|v| format!("write {path:?} failed: {v}").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_weight_boundary_from_spec_s6() {
        assert_eq!(cpu_weight(1024), 40);
    }

    #[test]
    fn cpu_weight_range_endpoints() {
        assert_eq!(cpu_weight(2), 1);
        assert_eq!(cpu_weight(262144), 10000);
    }

    #[test]
    fn cpu_weight_clamps_out_of_range_shares() {
        assert_eq!(cpu_weight(0), cpu_weight(2));
        assert_eq!(cpu_weight(1_000_000), cpu_weight(262144));
    }

    #[test]
    fn swap_max_clamps_negative_to_zero() {
        assert_eq!(swap_max(50, 100), 0);
        assert_eq!(swap_max(150, 100), 50);
    }
}
