use std::fs;
use std::io;
use std::path::Path;

use log::info;

/// Ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory at: {}", path.display());
    }
    Ok(())
}

/// Directory holding the config and preference files.
pub fn default_config_dir() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join(env!("CARGO_PKG_NAME")))
}
