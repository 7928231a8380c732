// Wed Feb 4 2026 - Alex

use std::fs;
use std::io;
use std::path::Path;

/// Recursively copy the contents of `src` into `dst`, overwriting files
/// that already exist.
pub fn copy_dir_contents(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_contents(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Total size in bytes of every file under `path`.
pub fn sum_directory_usage(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut total = 0;
    for entry in entries.flatten() {
        match entry.file_type() {
            Ok(t) if t.is_dir() => total += sum_directory_usage(&entry.path()),
            Ok(_) => total += entry.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => {}
        }
    }
    total
}

/// Remove a tree, swallowing errors; used on cleanup paths where the
/// original failure must propagate instead.
pub fn remove_dir_best_effort(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        log::debug!("could not remove {}: {}", path.display(), e);
    }
}

/// Drop write permission on a directory before handing it to a consumer
/// that must only read it.
pub fn set_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}
