//! Atomic file replacement.
//!
//! Every file the pipeline produces (transcoded images, the manifest, the
//! processing cache) is written to a temporary file in the destination
//! directory and renamed over the target. Readers see either the previous
//! complete file or the new complete file, never a truncated one, and a
//! killed run leaves at most a stray temp file behind.
//!
//! A replaced file keeps its permissions. A new file gets the same mode
//! `std::fs::write` would give it (0o666 less the umask), not the 0o600 of a
//! bare temp file, so a web server running as another user can read it.

use std::io::{self, Write};
use std::path::Path;
use tempfile::Builder;

/// Replace `path` with `bytes`, creating parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut builder = Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Applied at creation, so the umask still takes effect
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
