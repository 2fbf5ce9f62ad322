//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Default | Override |
//! |---------|---------|----------|
//! | Config | `dirs::config_dir()/unified-intel/` | `UNIFIED_INTEL_CONFIG_DIR` |
//! | Data (databases, logs) | `dirs::data_dir()/unified-intel/` | `UNIFIED_INTEL_DATA_DIR` |

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "unified-intel";

fn resolve(override_dir: Option<OsString>, base: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    base.map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(
        std::env::var_os("UNIFIED_INTEL_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/unified-intel-config",
    )
}

/// Data root: SQLite databases and log files live here.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var_os("UNIFIED_INTEL_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/unified-intel-data",
    )
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default intelligence database (`data_dir()/intelligence.db`).
#[must_use]
pub fn intelligence_db() -> PathBuf {
    data_dir().join("intelligence.db")
}

/// Default version history database (`data_dir()/versions.db`).
#[must_use]
pub fn versions_db() -> PathBuf {
    data_dir().join("versions.db")
}
