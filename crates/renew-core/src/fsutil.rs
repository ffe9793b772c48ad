//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Filesystem helpers shared by backup, staging, and apply."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{IoResultExt, UpdateError};

/// File count and total size of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub files: u64,
    pub bytes: u64,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} files / {} bytes", self.files, self.bytes)
    }
}

/// Count regular files and their bytes below `root`.
pub fn tree_stats(root: &Path) -> Result<TreeStats, UpdateError> {
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|err| UpdateError::Io {
            context: format!("unable to walk {}", root.display()),
            source: err.into(),
        })?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .map_err(|err| UpdateError::Io {
                    context: format!("unable to stat {}", entry.path().display()),
                    source: err.into(),
                })?;
            stats.files += 1;
            stats.bytes += metadata.len();
        }
    }
    Ok(stats)
}

/// Copy `source` into a fresh directory at `target`.
pub fn copy_dir(source: &Path, target: &Path) -> Result<TreeStats, UpdateError> {
    let mut stats = TreeStats::default();
    copy_dir_into(source, target, &mut stats)?;
    Ok(stats)
}

fn copy_dir_into(source: &Path, target: &Path, stats: &mut TreeStats) -> Result<(), UpdateError> {
    fs::create_dir_all(target)
        .io_context(|| format!("unable to create directory {}", target.display()))?;
    for entry in fs::read_dir(source)
        .io_context(|| format!("unable to read directory {}", source.display()))?
    {
        let entry = entry.io_context(|| format!("unable to read entry in {}", source.display()))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let file_type = entry
            .file_type()
            .io_context(|| format!("unable to inspect {}", from.display()))?;
        if file_type.is_dir() {
            copy_dir_into(&from, &to, stats)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            stats.bytes += replace_file(&from, &to)?;
            stats.files += 1;
        }
    }
    Ok(())
}

/// Lay `source` over `target`.
///
/// Same-named files are overwritten and same-named subdirectories are
/// replaced wholesale. Entries of `target` absent from `source` are kept.
pub fn overlay_tree(source: &Path, target: &Path) -> Result<TreeStats, UpdateError> {
    let mut stats = TreeStats::default();
    fs::create_dir_all(target)
        .io_context(|| format!("unable to create directory {}", target.display()))?;
    for entry in fs::read_dir(source)
        .io_context(|| format!("unable to read directory {}", source.display()))?
    {
        let entry = entry.io_context(|| format!("unable to read entry in {}", source.display()))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let file_type = entry
            .file_type()
            .io_context(|| format!("unable to inspect {}", from.display()))?;
        if file_type.is_dir() {
            remove_entry(&to)?;
            copy_dir_into(&from, &to, &mut stats)?;
        } else {
            if to.is_dir() && !to.is_symlink() {
                remove_entry(&to)?;
            }
            if file_type.is_symlink() {
                copy_symlink(&from, &to)?;
            } else {
                stats.bytes += replace_file(&from, &to)?;
                stats.files += 1;
            }
        }
    }
    Ok(stats)
}

/// Make `target` hold exactly what `snapshot` holds.
///
/// Top-level entries of `target` that the snapshot lacks are removed first so
/// files introduced by a partial update do not survive a rollback.
pub fn restore_tree(snapshot: &Path, target: &Path) -> Result<TreeStats, UpdateError> {
    if !snapshot.is_dir() {
        return Err(UpdateError::Io {
            context: format!("backup {} is not a directory", snapshot.display()),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
    }
    if target.is_dir() {
        for entry in fs::read_dir(target)
            .io_context(|| format!("unable to read directory {}", target.display()))?
        {
            let entry =
                entry.io_context(|| format!("unable to read entry in {}", target.display()))?;
            if !snapshot.join(entry.file_name()).exists() {
                debug!(path = %entry.path().display(), "removing entry absent from backup");
                remove_entry(&entry.path())?;
            }
        }
    }
    overlay_tree(snapshot, target)
}

/// Copy one file through a sibling temporary so the destination is swapped
/// atomically, even if the old file is still mapped by a running process.
fn replace_file(from: &Path, to: &Path) -> Result<u64, UpdateError> {
    let staging = sibling_temp(to);
    let bytes = fs::copy(from, &staging)
        .io_context(|| format!("unable to copy {} to {}", from.display(), to.display()))?;
    if let Err(source) = fs::rename(&staging, to) {
        let _ = fs::remove_file(&staging);
        return Err(UpdateError::Io {
            context: format!("unable to replace {}", to.display()),
            source,
        });
    }
    Ok(bytes)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), UpdateError> {
    let link = fs::read_link(from).io_context(|| format!("unable to read link {}", from.display()))?;
    remove_entry(to)?;
    std::os::unix::fs::symlink(&link, to)
        .io_context(|| format!("unable to create link {}", to.display()))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), UpdateError> {
    replace_file(from, to).map(|_| ())
}

/// Remove a file, link, or directory tree if present.
pub fn remove_entry(path: &Path) -> Result<(), UpdateError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(UpdateError::Io {
                context: format!("unable to inspect {}", path.display()),
                source,
            })
        }
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).io_context(|| format!("unable to remove {}", path.display()))
    } else {
        fs::remove_file(path).io_context(|| format!("unable to remove {}", path.display()))
    }
}

fn sibling_temp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.renew-tmp"))
}

/// A path `dir/{prefix}{timestamp}{extension}` that does not exist yet.
///
/// Timestamps sort lexically in creation order, which retention relies on.
pub fn timestamped_path(dir: &Path, prefix: &str, extension: Option<&str>) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
    let mut candidate = dir.join(format!("{prefix}{stamp}{suffix}"));
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{prefix}{stamp}-{counter:03}{suffix}"));
        counter += 1;
    }
    candidate
}

/// Entries of `dir` whose name starts with `prefix`, oldest first.
pub fn list_prefixed(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, UpdateError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.into_path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// Delete all but the newest `keep` entries carrying `prefix`.
///
/// Individual deletion failures are logged and skipped; the removed paths are
/// returned.
pub fn prune_oldest(dir: &Path, prefix: &str, keep: usize) -> Result<Vec<PathBuf>, UpdateError> {
    let entries = list_prefixed(dir, prefix)?;
    let excess = entries.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for path in entries.into_iter().take(excess) {
        match remove_entry(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "pruned");
                removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to prune entry"),
        }
    }
    Ok(removed)
}

/// Serialize `value` as pretty JSON and move it into place in one rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), UpdateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .io_context(|| format!("unable to create directory {}", parent.display()))?;
    }
    let body = serde_json::to_vec_pretty(value).map_err(|source| UpdateError::Encode {
        context: path.display().to_string(),
        source,
    })?;
    let staging = sibling_temp(path);
    fs::write(&staging, body).io_context(|| format!("unable to write {}", staging.display()))?;
    fs::rename(&staging, path).io_context(|| format!("unable to move {} into place", path.display()))
}
