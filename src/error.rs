/// Boxed error type shared across the crate.
///
/// Matches the rest of the Rust container-tooling ecosystem this crate grew out of:
/// syscalls fail with an errno, mounts fail with a path and an errno, and callers only
/// ever need to log or propagate the message — not match on a taxonomy of variants.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub(crate) fn ignore_kind(
    result: std::io::Result<()>,
    kind: std::io::ErrorKind,
) -> std::io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == kind => Ok(()),
        Err(err) => Err(err),
    }
}
