//! `llbox`: a Linux application container launcher compatible with the OCI
//! runtime model.
//!
//! This crate owns the container construction pipeline (§4.8): the
//! multi-stage fork/clone sequence that assembles namespaces, user-ID
//! mappings, layered root filesystems, pseudo-devices, and the payload
//! process. Configuration parsing from disk, the D-Bus proxy binary itself,
//! the logging sink, and any invocation CLI are external collaborators —
//! see [`config`] for the data model this crate expects a caller to have
//! already parsed into.

pub mod cgroup;
pub mod config;
mod dbus;
mod devices;
mod engine;
pub mod error;
mod hooks;
mod idmap;
pub mod logging;
pub mod mount;
mod platform;
mod rootfs;
mod seccomp;
mod semaphore;

pub use config::Runtime;
pub use engine::{Engine, EngineOptions};
pub use error::Error;
pub(crate) use error::ignore_kind;
pub use platform::{parse_wstatus, wait, WaitMode};
pub use semaphore::Semaphore;
