//! Host platform (linux for example) utility functions

use std::path::PathBuf;

/// Environment variable holding the root directory of the software.
pub const SW_ROOT_ENV: &str = "GECKO_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the root directory of the software, from the `GECKO_SW_ROOT` environment variable.
pub fn get_gecko_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV).map(PathBuf::from)
}
