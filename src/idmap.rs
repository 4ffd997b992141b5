//! Writes uid/gid maps and `setgroups=deny` to `/proc/<pid>/...` for a
//! target PID (§4.5). Generalizes the teacher's `userns.rs` `UserMapper`
//! (which shells out to `new{u,g}idmap` for an unprivileged caller mapping
//! itself) into a direct procfs writer for an arbitrary target PID, since
//! the spec's entry/payload processes are mapped by their already-privileged
//! parent rather than by a setuid helper binary.

use std::fs::OpenOptions;
use std::io::Write as _;

use nix::unistd::Pid;

use crate::config::IdMap;
use crate::Error;

/// Writes `uid_map`, then `setgroups=deny`, then `gid_map`, in that order
/// (§4.5: `setgroups=deny` must precede `gid_map` for an unprivileged
/// writer). Each file is closed after its write so the kernel validates it
/// immediately rather than batching writes behind one descriptor.
pub fn write_id_mappings(pid: Pid, uid_mappings: &[IdMap], gid_mappings: &[IdMap]) -> Result<(), Error> {
    write_map(pid, "uid_map", uid_mappings)?;
    write_setgroups_deny(pid)?;
    write_map(pid, "gid_map", gid_mappings)?;
    Ok(())
}

fn write_map(pid: Pid, file: &str, mappings: &[IdMap]) -> Result<(), Error> {
    if mappings.is_empty() {
        return Ok(());
    }
    let path = format!("/proc/{pid}/{file}");
    let mut body = String::new();
    for m in mappings {
        body.push_str(&format!("{} {} {}\n", m.container_id, m.host_id, m.size));
    }
    let mut f = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|v| format!("open {path} failed: {v}"))?;
    f.write_all(body.as_bytes())
        .map_err(|v| format!("write {path} failed: {v}"))?;
    Ok(())
}

fn write_setgroups_deny(pid: Pid) -> Result<(), Error> {
    let path = format!("/proc/{pid}/setgroups");
    let mut f = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|v| format!("open {path} failed: {v}"))?;
    f.write_all(b"deny")
        .map_err(|v| format!("write {path} failed: {v}"))?;
    Ok(())
}

/// Builds the identity mapping used for the payload in rootless mode (§4.8
/// Phase B step 13): `{containerID: host_uid/host_gid, hostID: 0, size: 1}`.
pub fn identity_mapping(host_id: u32) -> Vec<IdMap> {
    vec![IdMap {
        container_id: host_id,
        host_id: 0,
        size: 1,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mapping_maps_container_to_host() {
        let m = identity_mapping(1000);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].container_id, 1000);
        assert_eq!(m[0].host_id, 0);
        assert_eq!(m[0].size, 1);
    }
}
