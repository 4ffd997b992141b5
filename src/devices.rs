//! PrepareDefaultDevices and PrepareLinks (§4.8 Phase B steps 7 and 9): the
//! fixed pseudo-device set and the symlink farm under `/` and `/dev`.
//!
//! No direct teacher analogue (the teacher's sandbox never builds a `/dev`
//! of its own — it bind-mounts the host's), so this is grounded in
//! `original_source`'s device table and the teacher's `ignore_kind(...,
//! AlreadyExists)` idiom for idempotent directory/symlink creation.

use std::os::unix::fs::symlink;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};
use nix::sys::stat::{mknod, umask, Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};

use crate::error::ignore_kind;
use crate::Error;

struct Device {
    name: &'static str,
    major: u64,
    minor: u64,
}

/// The fixed device list from §4.8 step 7: `{null, zero, full, random,
/// urandom, tty}` with their canonical `(major, minor)` pairs.
const DEVICES: &[Device] = &[
    Device { name: "null", major: 1, minor: 3 },
    Device { name: "zero", major: 1, minor: 5 },
    Device { name: "full", major: 1, minor: 7 },
    Device { name: "random", major: 1, minor: 8 },
    Device { name: "urandom", major: 1, minor: 9 },
    Device { name: "tty", major: 5, minor: 0 },
];

/// Creates the fixed device set under `root/dev`. Privileged callers `mknod`
/// + `chmod` + `chown 0:0`; rootless callers bind-mount the host device node
/// in instead (mknod requires `CAP_MKNOD`, which a user namespace without a
/// device-namespace extension does not grant). Always creates
/// `/dev/ptmx -> /dev/pts/ptmx`.
pub fn prepare_default_devices(root: &Path, privileged: bool) -> Result<(), Error> {
    let dev = root.join("dev");
    ignore_kind(
        std::fs::create_dir_all(&dev),
        std::io::ErrorKind::AlreadyExists,
    )?;
    for device in DEVICES {
        let target = dev.join(device.name);
        if privileged {
            if let Err(err) = create_device_node(&target, device) {
                tracing::warn!(device = device.name, %err, "mknod failed, skipping device");
            }
        } else if let Err(err) = bind_mount_host_device(&target, device.name) {
            tracing::warn!(device = device.name, %err, "bind-mount of host device failed");
        }
    }
    symlink_idempotent(Path::new("/dev/pts/ptmx"), &dev.join("ptmx"));
    Ok(())
}

fn create_device_node(target: &Path, device: &Device) -> Result<(), Error> {
    let umask_saved = umask(Mode::empty());
    let result = mknod(
        target,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(0o666),
        nix::sys::stat::makedev(device.major, device.minor),
    );
    umask(umask_saved);
    match result {
        Ok(()) => {}
        Err(nix::errno::Errno::EEXIST) => {}
        Err(err) => return Err(format!("mknod {target:?} failed: {err}").into()),
    }
    std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o666))?;
    chown(target, Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
        .map_err(|v| format!("chown {target:?} failed: {v}"))?;
    Ok(())
}

fn bind_mount_host_device(target: &Path, name: &str) -> Result<(), Error> {
    let host_path = PathBuf::from("/dev").join(name);
    if !host_path.exists() {
        return Ok(());
    }
    if !target.exists() {
        std::fs::File::create(target)?;
    }
    mount(
        Some(host_path.as_path()),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|v| format!("bind-mount {host_path:?} -> {target:?} failed: {v}").into())
}

/// Creates the fixed symlink set from §4.8 step 9. `link_lfs` gates the
/// `/bin`, `/lib*` -> `/usr/...` symlinks (merged-/usr layout); the `/dev/*`
/// symlinks into `/proc` are unconditional. Idempotent: an existing symlink
/// (even pointing somewhere else) is silently tolerated per §8's
/// idempotence property.
pub fn prepare_links(root: &Path, link_lfs: bool) -> Result<(), Error> {
    if link_lfs {
        for (link, target) in [
            ("bin", "usr/bin"),
            ("lib", "usr/lib"),
            ("lib32", "usr/lib32"),
            ("lib64", "usr/lib64"),
            ("libx32", "usr/libx32"),
        ] {
            symlink_idempotent(Path::new(target), &root.join(link));
        }
    }
    for (link, target) in [
        ("dev/core", "/proc/kcore"),
        ("dev/fd", "/proc/self/fd"),
        ("dev/stderr", "/proc/self/fd/2"),
        ("dev/stdin", "/proc/self/fd/0"),
        ("dev/stdout", "/proc/self/fd/1"),
    ] {
        symlink_idempotent(Path::new(target), &root.join(link));
    }
    Ok(())
}

fn symlink_idempotent(target: &Path, link: &Path) {
    if let Err(err) = symlink(target, link) {
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            tracing::warn!(?link, ?target, %err, "symlink failed");
        }
    }
}
