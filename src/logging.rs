//! Log-level parsing for `LINGLONG_LOG_LEVEL` and an opt-in subscriber installer.
//!
//! The crate itself only ever emits `tracing` events — it never installs a
//! subscriber, since where those events end up (journal, file, terminal) is
//! the embedder's concern. `init_from_env` is provided purely as a
//! convenience for binaries that want the documented environment variable
//! to behave the way the original implementation's logger did.

use std::env;
use std::str::FromStr;

const LOG_LEVEL_VAR: &str = "LINGLONG_LOG_LEVEL";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Error
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debug" => Ok(LogLevel::Debug),
            "Info" => Ok(LogLevel::Info),
            "Warning" => Ok(LogLevel::Warning),
            "Error" => Ok(LogLevel::Error),
            "Fatal" => Ok(LogLevel::Fatal),
            _ => Err(()),
        }
    }
}

impl LogLevel {
    fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning | LogLevel::Error | LogLevel::Fatal => tracing::Level::WARN,
        }
    }
}

/// Reads `LINGLONG_LOG_LEVEL`, defaulting to `Error` on absence or garbage.
pub fn level_from_env() -> LogLevel {
    env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|v| LogLevel::from_str(&v).ok())
        .unwrap_or_default()
}

/// Installs a `tracing_subscriber::fmt` subscriber at the level named by
/// `LINGLONG_LOG_LEVEL`. Not called by [`crate::Engine::start`]; the logging
/// sink is an external collaborator an embedder wires up itself.
#[cfg(feature = "fmt-subscriber")]
pub fn init_from_env() {
    let level = level_from_env().as_tracing_level();
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// Logs at the Fatal level and terminates the process, matching the original
/// logger's behavior of calling `exit` once a Fatal event is emitted.
pub fn fatal(msg: impl AsRef<str>) -> ! {
    tracing::error!(fatal = true, "{}", msg.as_ref());
    std::process::exit(1)
}
