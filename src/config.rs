//! The runtime configuration data model (§3). Deserialization from an
//! on-disk bundle is out of scope for this crate — callers already hold a
//! parsed [`Runtime`] — but every type derives `serde::Deserialize` because
//! that is the only concrete shape an embedder has to target.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Runtime {
    pub root: PathBuf,
    /// Advisory only; current design does not apply it (see [`crate::logging`]
    /// and DESIGN.md for the open question this resolves).
    #[serde(default)]
    pub hostname: String,
    pub process: Process,
    #[serde(default)]
    pub mounts: Vec<crate::mount::MountNode>,
    pub linux: Linux,
    #[serde(default)]
    pub hooks: Hooks,
    pub annotations: Annotations,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Process {
    #[serde(default)]
    pub cwd: PathBuf,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamespaceKind {
    Ipc,
    Uts,
    Mount,
    Pid,
    Net,
    User,
    Cgroup,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemoryResources {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub swap: i64,
    #[serde(default)]
    pub reservation: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CpuResources {
    #[serde(default)]
    pub period: u64,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub shares: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Resources {
    #[serde(default)]
    pub memory: MemoryResources,
    #[serde(default)]
    pub cpu: CpuResources,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Seccomp {
    pub default_action: String,
    #[serde(default)]
    pub syscalls: Vec<SeccompRule>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SeccompRule {
    pub names: Vec<String>,
    pub action: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Linux {
    pub namespaces: Vec<NamespaceKind>,
    #[serde(default)]
    pub uid_mappings: Vec<IdMap>,
    #[serde(default)]
    pub gid_mappings: Vec<IdMap>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub cgroups_path: String,
    #[serde(default)]
    pub seccomp: Option<Seccomp>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Hook {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Hooks {
    #[serde(default)]
    pub prestart: Vec<Hook>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnnotationsNative {
    #[serde(default)]
    pub mounts: Vec<crate::mount::MountNode>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnnotationsOverlayfs {
    pub lower_parent: PathBuf,
    #[serde(default)]
    pub mounts: Vec<crate::mount::MountNode>,
    pub upper: PathBuf,
    pub workdir: PathBuf,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DbusProxyInfo {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub bus_type: String,
    #[serde(default)]
    pub proxy_path: PathBuf,
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub interface: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Annotations {
    pub container_root_path: PathBuf,
    #[serde(default)]
    pub native: Option<AnnotationsNative>,
    #[serde(default)]
    pub overlayfs: Option<AnnotationsOverlayfs>,
    #[serde(default)]
    pub dbus_proxy_info: Option<DbusProxyInfo>,
}

impl Annotations {
    /// Validates the "exactly one of native/overlayfs" invariant from §3.
    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        match (&self.native, &self.overlayfs) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err("exactly one of annotations.native or .overlayfs, not both".into()),
            (None, None) => Err("exactly one of annotations.native or .overlayfs is required".into()),
        }
    }
}
