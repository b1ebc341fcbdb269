use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Readers either see the previous content or the new content, never a mix.
/// The result is world-readable (0644 on Unix).
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    write_via_tempfile(path, data, 0o644)
}

/// Like [`atomic_write`], but the file is mode 0600 on Unix before it
/// becomes visible at `path`.
pub fn atomic_write_private(path: &Path, data: &[u8]) -> Result<()> {
    write_via_tempfile(path, data, 0o600)
}

fn write_via_tempfile(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    // NamedTempFile starts out 0600.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
