//! The three interchangeable filesystem drivers (§4.3), generalized from the
//! teacher's single-purpose `OverlayMount`/`BaseMounts` (which each performed
//! one fixed mount) into the spec's polymorphic `{setup, mount_node,
//! create_destination}` interface driving an arbitrary node sequence.

use std::fmt::Debug;
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::mount::{mount, MsFlags};

use crate::error::ignore_kind;
use crate::mount::MountNode;
use crate::Error;

/// Polymorphic over `{Setup, MountNode, CreateDestination}` per §9's design note.
pub trait FilesystemDriver: Debug + Send + Sync {
    /// Ensures `node.destination` exists under the staging root (a file for
    /// bind-to-file mounts, a directory otherwise).
    fn create_destination(&self, node: &MountNode) -> Result<(), Error>;

    /// Applies one node. On failure the node is logged and the error
    /// returned to [`crate::mount::HostMount`]; callers continue the
    /// sequence per §4.3's error policy.
    fn mount_node(&mut self, node: &MountNode) -> Result<(), Error>;

    /// Finalizes accumulated state (e.g. the single overlay mount). Default
    /// no-op for drivers that mount eagerly.
    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Direct `mount(2)` against the staging root, creating destinations as needed.
#[derive(Debug)]
pub struct NativeDriver {
    root: PathBuf,
}

impl NativeDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, destination: &Path) -> PathBuf {
        self.root.join(destination.strip_prefix("/").unwrap_or(destination))
    }
}

impl FilesystemDriver for NativeDriver {
    fn create_destination(&self, node: &MountNode) -> Result<(), Error> {
        let target = self.resolve(&node.destination);
        if node.kind == crate::mount::MountType::Bind && node.source.is_file() {
            if let Some(parent) = target.parent() {
                ignore_kind(create_dir_all(parent), ErrorKind::AlreadyExists)?;
            }
            ignore_kind(
                File::create(&target).map(|_| ()),
                ErrorKind::AlreadyExists,
            )?;
        } else {
            ignore_kind(create_dir_all(&target), ErrorKind::AlreadyExists)?;
        }
        Ok(())
    }

    fn mount_node(&mut self, node: &MountNode) -> Result<(), Error> {
        let target = self.resolve(&node.destination);
        let data = node.data_string();
        mount(
            Some(node.source.as_path()),
            &target,
            Some(node.resolved_fstype()),
            node.flags.to_ms_flags(),
            data.as_deref(),
        )
        .map_err(|v| format!("mount {:?} -> {:?} failed: {v}", node.source, target).into())
    }
}

/// Assembles a numbered lowerdir chain under `lower_parent` and mounts a
/// single user-space overlay at the staging root once all nodes are seen.
///
/// Each node is materialized into its own numbered subpath via a
/// [`NativeDriver`] rooted at `lower_parent` (mirroring
/// `original_source`'s `PrepareOverlayfsRootfs`, which mounts node
/// `i` at `lower_parent/i/node.destination` *before* that numbered path is
/// pushed onto `lower_dirs`) rather than assuming `lower_parent/i` already
/// exists and is populated.
#[derive(Debug)]
pub struct OverlayFuseDriver {
    root: PathBuf,
    lower_parent: PathBuf,
    upperdir: PathBuf,
    workdir: PathBuf,
    lower_driver: NativeDriver,
    lowerdirs: Vec<PathBuf>,
}

impl OverlayFuseDriver {
    pub fn new(
        root: impl Into<PathBuf>,
        lower_parent: impl Into<PathBuf>,
        upperdir: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let lower_parent = lower_parent.into();
        Self {
            root: root.into(),
            lower_driver: NativeDriver::new(lower_parent.clone()),
            lower_parent,
            upperdir: upperdir.into(),
            workdir: workdir.into(),
            lowerdirs: Vec::new(),
        }
    }

    /// The node `i` sees its destination rewritten to `i/<node.destination>`
    /// so it lands under `lower_parent/i` instead of directly under
    /// `lower_parent`.
    fn indexed_node(&self, index: usize, node: &MountNode) -> MountNode {
        let relative = node
            .destination
            .strip_prefix("/")
            .unwrap_or(&node.destination);
        let mut indexed = node.clone();
        indexed.destination = PathBuf::from(index.to_string()).join(relative);
        indexed
    }
}

impl FilesystemDriver for OverlayFuseDriver {
    fn create_destination(&self, node: &MountNode) -> Result<(), Error> {
        let indexed = self.indexed_node(self.lowerdirs.len(), node);
        self.lower_driver.create_destination(&indexed)
    }

    fn mount_node(&mut self, node: &MountNode) -> Result<(), Error> {
        let index = self.lowerdirs.len();
        let indexed = self.indexed_node(index, node);
        self.lower_driver.mount_node(&indexed)?;
        self.lowerdirs.push(self.lower_parent.join(index.to_string()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        if self.lowerdirs.is_empty() {
            return Ok(());
        }
        let lowerdir = Option::<Vec<_>>::from_iter(self.lowerdirs.iter().map(|v| v.to_str()))
            .ok_or("invalid overlay lowerdir path")?
            .join(":");
        let upperdir = self
            .upperdir
            .to_str()
            .ok_or("invalid overlay upperdir path")?;
        let workdir = self
            .workdir
            .to_str()
            .ok_or("invalid overlay workdir path")?;
        let data = format!("lowerdir={lowerdir},upperdir={upperdir},workdir={workdir}");
        ignore_kind(create_dir_all(&self.root), ErrorKind::AlreadyExists)?;
        mount(
            Some("overlay"),
            &self.root,
            Some("overlay"),
            MsFlags::empty(),
            Some(data.as_str()),
        )
        .map_err(|v| format!("overlay mount at {:?} failed: {v}", self.root).into())
    }
}

/// Collects `source:destination` records and hands them to an external FUSE
/// proxy that exposes a single merged root at the staging root.
#[derive(Debug)]
pub struct FuseProxyDriver {
    root: PathBuf,
    binary: PathBuf,
    records: Vec<String>,
}

impl FuseProxyDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            binary: "/usr/bin/ll-fuse-proxy".into(),
            records: Vec::new(),
        }
    }
}

impl FilesystemDriver for FuseProxyDriver {
    fn create_destination(&self, _node: &MountNode) -> Result<(), Error> {
        Ok(())
    }

    fn mount_node(&mut self, node: &MountNode) -> Result<(), Error> {
        self.records.push(format!(
            "{}:{}",
            node.source.display(),
            node.destination.display()
        ));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        if self.records.is_empty() {
            return Ok(());
        }
        ignore_kind(create_dir_all(&self.root), ErrorKind::AlreadyExists)?;
        let mut child = Command::new(&self.binary)
            .arg(&self.root)
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(|v| format!("cannot spawn fuse proxy {:?}: {v}", self.binary))?;
        if let Some(mut stdin) = child.stdin.take() {
            let payload = self.records.join("\n") + "\n";
            stdin.write_all(payload.as_bytes())?;
        }
        Ok(())
    }
}
