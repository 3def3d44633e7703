//! Endpoint naming for the service's control channel.

use std::path::PathBuf;

/// Default endpoint: a named pipe on Windows.
#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = r"\\.\pipe\WinBtrfsService";

/// Default endpoint: a Unix socket path elsewhere.
#[cfg(not(windows))]
pub const DEFAULT_ENDPOINT: &str = "/run/btrfsd/btrfsd.sock";

/// Environment variable to override the endpoint.
pub const ENDPOINT_ENV_VAR: &str = "BTRFSD_ENDPOINT";

/// Socket file name used under `XDG_RUNTIME_DIR`.
#[cfg(not(windows))]
const RUNTIME_SOCKET_NAME: &str = "btrfsd.sock";

/// Resolve the endpoint to use.
///
/// Resolution order:
/// 1. `BTRFSD_ENDPOINT` environment variable
/// 2. `$XDG_RUNTIME_DIR/btrfsd.sock` (Unix only, if XDG_RUNTIME_DIR is set)
/// 3. [`DEFAULT_ENDPOINT`]
#[must_use]
pub fn default_endpoint() -> PathBuf {
    if let Ok(path) = std::env::var(ENDPOINT_ENV_VAR) {
        return PathBuf::from(path);
    }

    #[cfg(not(windows))]
    {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir).join(RUNTIME_SOCKET_NAME);
        }
    }

    PathBuf::from(DEFAULT_ENDPOINT)
}
