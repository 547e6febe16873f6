//! Atomic file writes and permission helpers.
//!
//! Every artifact tikvpn produces goes through `write_atomic`, so an
//! interrupted run leaves either the old file or the new one, never a
//! truncated mix.

use crate::error::AppError;
use std::io::Write;
use std::path::Path;

/// Write `contents` to a temp file next to `path`, chmod it, fsync it and
/// rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), AppError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tikvpn-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    set_mode(tmp.path(), mode)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

/// Like `write_atomic`, but leaves the file alone when it already holds
/// exactly `contents`. Returns `true` when the file was (re)written.
pub fn write_if_changed(path: &Path, contents: &[u8], mode: u32) -> Result<bool, AppError> {
    match std::fs::read(path) {
        Ok(existing) if existing == contents => {
            set_mode(path, mode)?;
            Ok(false)
        }
        Ok(_) => {
            write_atomic(path, contents, mode)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            write_atomic(path, contents, mode)?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Create `path` (and parents) and restrict it to `mode`.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<(), AppError> {
    std::fs::create_dir_all(path)?;
    set_mode(path, mode)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<(), AppError> {
    Ok(())
}

#[cfg(unix)]
pub fn mode_of(path: &Path) -> Result<u32, AppError> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_sets_mode_and_leaves_no_temp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/file.conf");
        write_atomic(&path, b"hello\n", 0o600).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        #[cfg(unix)]
        assert_eq!(mode_of(&path).unwrap(), 0o600);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_if_changed_reports_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sysctl.conf");
        assert!(write_if_changed(&path, b"a = 1\n", 0o644).unwrap());
        assert!(!write_if_changed(&path, b"a = 1\n", 0o644).unwrap());
        assert!(write_if_changed(&path, b"a = 2\n", 0o644).unwrap());
    }
}
