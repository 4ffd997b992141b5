//! Mount node data model and the [`HostMount`] owner (§4.3, §4.4).

mod driver;

pub use driver::{FilesystemDriver, FuseProxyDriver, NativeDriver, OverlayFuseDriver};

use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::Error;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const RDONLY = 1 << 0;
        const NOSUID = 1 << 1;
        const NODEV  = 1 << 2;
        const NOEXEC = 1 << 3;
        const REC    = 1 << 4;
        const BIND   = 1 << 5;
        const MOVE   = 1 << 6;
    }
}

impl Serialize for MountFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for MountFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MountFlags::from_bits_truncate(u32::deserialize(deserializer)?))
    }
}

impl MountFlags {
    pub(crate) fn to_ms_flags(self) -> nix::mount::MsFlags {
        let mut out = nix::mount::MsFlags::empty();
        if self.contains(Self::RDONLY) {
            out |= nix::mount::MsFlags::MS_RDONLY;
        }
        if self.contains(Self::NOSUID) {
            out |= nix::mount::MsFlags::MS_NOSUID;
        }
        if self.contains(Self::NODEV) {
            out |= nix::mount::MsFlags::MS_NODEV;
        }
        if self.contains(Self::NOEXEC) {
            out |= nix::mount::MsFlags::MS_NOEXEC;
        }
        if self.contains(Self::REC) {
            out |= nix::mount::MsFlags::MS_REC;
        }
        if self.contains(Self::BIND) {
            out |= nix::mount::MsFlags::MS_BIND;
        }
        if self.contains(Self::MOVE) {
            out |= nix::mount::MsFlags::MS_MOVE;
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MountType {
    Bind,
    Proc,
    Tmpfs,
    Sysfs,
    Devpts,
    Mqueue,
    Cgroup2,
    Overlay,
    FuseProxy,
}

impl MountType {
    fn fstype(self) -> &'static str {
        match self {
            MountType::Bind => "none",
            MountType::Proc => "proc",
            MountType::Tmpfs => "tmpfs",
            MountType::Sysfs => "sysfs",
            MountType::Devpts => "devpts",
            MountType::Mqueue => "mqueue",
            MountType::Cgroup2 => "cgroup2",
            MountType::Overlay => "overlay",
            MountType::FuseProxy => "fuse-proxy",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MountNode {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(rename = "type")]
    pub kind: MountType,
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub flags: MountFlags,
    #[serde(default)]
    pub data: Vec<String>,
}

impl MountNode {
    pub(crate) fn resolved_fstype(&self) -> &str {
        self.fs_type.as_deref().unwrap_or_else(|| self.kind.fstype())
    }

    pub(crate) fn data_string(&self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.join(","))
        }
    }
}

/// Owns exactly one filesystem driver and runs mount-node operations against
/// a staging root through it.
pub struct HostMount {
    driver: Box<dyn FilesystemDriver>,
}

impl HostMount {
    pub fn new(driver: Box<dyn FilesystemDriver>) -> Self {
        Self { driver }
    }

    /// Replaces the active driver, taking ownership of `driver`.
    pub fn setup(&mut self, driver: Box<dyn FilesystemDriver>) {
        self.driver = driver;
    }

    /// Applies a single mount node. Failures are logged by the driver and
    /// reported back to the caller, who (per §4.3's error policy) continues
    /// with subsequent nodes rather than aborting the whole sequence.
    pub fn mount_node(&mut self, node: &MountNode) -> Result<(), Error> {
        self.driver.create_destination(node)?;
        self.driver.mount_node(node)
    }

    /// Finalizes the driver (e.g. performs the single overlay mount once all
    /// lowerdirs have been accumulated). No-op for drivers that act
    /// eagerly per node.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.driver.finish()
    }
}
