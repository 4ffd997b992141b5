//! Staging-root assembly and `pivot_root` (§4.8 Phase B steps 2-4, 8).
//!
//! Generalizes the teacher's `setup_mount_namespace`/`remount_private_root`/
//! `pivot_root` trio in the deleted `mounts.rs` from "one fixed mount list
//! baked into `Container`" to the spec's driver-selected staging sequence,
//! and adds the rootless-overlay `mount(MS_MOVE)` + `chroot` variant the
//! teacher never needed (its sandbox is always privileged).

use std::fs::create_dir_all;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, chroot};

use crate::error::ignore_kind;
use crate::mount::{FilesystemDriver, HostMount, MountNode, NativeDriver, OverlayFuseDriver};
use crate::Error;

const FUSE_PROXY_BACKEND_VAR: &str = "LL_BOX_FS_BACKEND";

pub enum RootfsMounts<'a> {
    Native { mounts: &'a [MountNode] },
    Overlayfs {
        lower_parent: &'a Path,
        mounts: &'a [MountNode],
        upper: &'a Path,
        workdir: &'a Path,
    },
}

/// Mounts `/` as `rec,slave` so that nothing mounted below the staging root
/// leaks back to the host (§4.8 step 2).
pub fn make_root_slave() -> Result<(), Error> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_SLAVE,
        None::<&str>,
    )
    .map_err(|v| format!("mount / rec,slave failed: {v}").into())
}

/// Mounts a tmpfs at `container_root_path` with `NOSUID|NODEV` (§4.8 step 3).
pub fn mount_staging_tmpfs(container_root_path: &Path) -> Result<(), Error> {
    ignore_kind(
        create_dir_all(container_root_path),
        ErrorKind::AlreadyExists,
    )?;
    mount(
        Some("tmpfs"),
        container_root_path,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|v| format!("mount tmpfs at {container_root_path:?} failed: {v}").into())
}

/// Returns whether `LL_BOX_FS_BACKEND=fuse-proxy` selects the FUSE-proxy
/// driver for an overlayfs annotation (§4.4's selection policy).
pub fn use_fuse_proxy_backend() -> bool {
    std::env::var(FUSE_PROXY_BACKEND_VAR).as_deref() == Ok("fuse-proxy")
}

/// PrepareRootfs (§4.8 step 4): selects the driver per §4.4, applies the
/// annotation-owned mount list, and finalizes it (the single overlay/FUSE
/// mount, for those drivers). Returns the constructed [`HostMount`] so
/// `config.mounts` (§4.8 step 5) can be applied through the same driver.
pub fn prepare_rootfs(root: &Path, spec: RootfsMounts<'_>) -> Result<HostMount, Error> {
    let driver: Box<dyn FilesystemDriver> = match &spec {
        RootfsMounts::Native { .. } => Box::new(NativeDriver::new(root)),
        RootfsMounts::Overlayfs {
            lower_parent,
            upper,
            workdir,
            ..
        } => {
            if use_fuse_proxy_backend() {
                Box::new(crate::mount::FuseProxyDriver::new(root))
            } else {
                Box::new(OverlayFuseDriver::new(root, *lower_parent, *upper, *workdir))
            }
        }
    };
    let mut host_mount = HostMount::new(driver);
    let nodes: &[MountNode] = match &spec {
        RootfsMounts::Native { mounts } => mounts,
        RootfsMounts::Overlayfs { mounts, .. } => mounts,
    };
    apply_nodes(&mut host_mount, nodes);
    // §9: Prepare* return codes are advisory; downstream mount checks are
    // authoritative, so a finish() failure is logged, not propagated.
    if let Err(err) = host_mount.finish() {
        tracing::warn!(%err, "prepare_rootfs finish failed (advisory)");
    }
    Ok(host_mount)
}

/// Applies `config.mounts` through the already-selected driver (§4.8 step 5).
pub fn apply_config_mounts(host_mount: &mut HostMount, mounts: &[MountNode]) {
    apply_nodes(host_mount, mounts);
}

fn apply_nodes(host_mount: &mut HostMount, nodes: &[MountNode]) {
    for node in nodes {
        if let Err(err) = host_mount.mount_node(node) {
            tracing::warn!(?node.destination, %err, "mount node failed, continuing");
        }
    }
}

/// `pivot_root` (§4.8 step 8). Two variants depending on mode:
///
/// - Rootless with overlayfs: `mount(".", "/", MS_MOVE)` then `chroot(".")`
///   (no separate mount namespace entry for the old root exists to detach).
/// - Otherwise: bind-mount the staging root onto itself, create `ll-host`
///   inside it, `pivot_root` into that, `chdir("/")`, `chroot(".")`, then
///   detach `ll-host` (§8 invariant 7: the old root is unmounted afterward).
pub fn pivot_root(root: &Path, rootless_overlay: bool) -> Result<(), Error> {
    if rootless_overlay {
        chdir(root)?;
        mount(
            Some("."),
            "/",
            None::<&str>,
            MsFlags::MS_MOVE,
            None::<&str>,
        )
        .map_err(|v| format!("mount MS_MOVE failed: {v}"))?;
        chroot(".").map_err(|v| format!("chroot failed: {v}"))?;
        chdir("/")?;
        return Ok(());
    }

    mount(
        Some(root),
        root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|v| format!("self bind-mount of {root:?} failed: {v}"))?;

    let old_root: PathBuf = root.join("ll-host");
    ignore_kind(
        create_dir_all(&old_root),
        ErrorKind::AlreadyExists,
    )?;
    nix::unistd::pivot_root(root, &old_root)
        .map_err(|v| format!("pivot_root({root:?}, {old_root:?}) failed: {v}"))?;
    chdir("/")?;
    chroot(".").map_err(|v| format!("chroot failed: {v}"))?;
    umount2("/ll-host", MntFlags::MNT_DETACH)
        .map_err(|v| format!("umount2 ll-host failed: {v}"))?;
    Ok(())
}
