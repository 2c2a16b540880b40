//! Host platform utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::env;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable naming the software root directory.
pub const SW_ROOT_ENV_VAR: &str = "SMARTROVER_ROOT";

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the software root directory.
///
/// Taken from the `SMARTROVER_ROOT` environment variable if set, otherwise
/// the current working directory is used.
pub fn get_smartrover_root() -> std::io::Result<PathBuf> {
    match env::var(SW_ROOT_ENV_VAR) {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => env::current_dir(),
    }
}
