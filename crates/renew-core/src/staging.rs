//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Package extraction and structural verification."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{IoResultExt, UpdateError};
use crate::fsutil;

/// Prefix of staging directories; retention matches on it.
pub const STAGING_PREFIX: &str = "staged_";

/// An extracted package awaiting handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPackage {
    pub path: PathBuf,
    pub entries: usize,
}

/// Extracts packages into staging and checks their shape.
#[derive(Debug, Clone)]
pub struct PackageStager {
    root: PathBuf,
    required: Vec<String>,
}

impl PackageStager {
    /// `required` names entries that must sit at the root of every package.
    pub fn new(root: impl Into<PathBuf>, required: Vec<String>) -> Self {
        Self {
            root: root.into(),
            required,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extract `archive` into a fresh `staged_{timestamp}` directory.
    ///
    /// Entries that would land outside the staging directory abort the
    /// extraction. The partial directory is removed on any failure.
    pub fn extract(&self, archive: &Path) -> Result<StagedPackage, UpdateError> {
        fs::create_dir_all(&self.root)
            .io_context(|| format!("unable to create staging root {}", self.root.display()))?;
        let path = fsutil::timestamped_path(&self.root, STAGING_PREFIX, None);
        match extract_into(archive, &path) {
            Ok(entries) => {
                info!(archive = %archive.display(), staging = %path.display(), entries, "package extracted");
                Ok(StagedPackage { path, entries })
            }
            Err(err) => {
                let _ = fsutil::remove_entry(&path);
                Err(err)
            }
        }
    }

    /// Confirm every required entry exists at the root of the staged package.
    pub fn verify(&self, staged: &StagedPackage) -> Result<(), UpdateError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|entry| !staged.path.join(entry.as_str()).is_file())
            .cloned()
            .collect();
        if missing.is_empty() {
            debug!(staging = %staged.path.display(), "staged package verified");
            Ok(())
        } else {
            Err(UpdateError::MissingEntries {
                dir: staged.path.clone(),
                missing,
            })
        }
    }

    /// Remove a staged package that will not be applied.
    pub fn discard(&self, staged: &StagedPackage) {
        if let Err(err) = fsutil::remove_entry(&staged.path) {
            warn!(staging = %staged.path.display(), error = %err, "failed to discard staged package");
        }
    }

    /// Keep only the newest `keep` staging directories.
    pub fn prune(&self, keep: usize) -> Result<Vec<PathBuf>, UpdateError> {
        fsutil::prune_oldest(&self.root, STAGING_PREFIX, keep)
    }
}

fn extract_into(archive_path: &Path, target: &Path) -> Result<usize, UpdateError> {
    let archive_error = |source: zip::result::ZipError| UpdateError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };
    let file = File::open(archive_path)
        .io_context(|| format!("unable to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;
    fs::create_dir_all(target)
        .io_context(|| format!("unable to create {}", target.display()))?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_error)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdateError::UnsafeEntry {
                entry: entry.name().to_owned(),
            });
        };
        let out = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out).io_context(|| format!("unable to create {}", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("unable to create {}", parent.display()))?;
        }
        let mut writer =
            File::create(&out).io_context(|| format!("unable to create {}", out.display()))?;
        io::copy(&mut entry, &mut writer)
            .io_context(|| format!("unable to extract {}", out.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                    .io_context(|| format!("unable to set mode on {}", out.display()))?;
            }
        }
        extracted += 1;
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }

    fn stager(root: &Path) -> PackageStager {
        PackageStager::new(
            root.join("staging"),
            vec!["renewd".to_owned(), "renewd.toml".to_owned()],
        )
    }

    #[test]
    fn extracts_and_verifies_package() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        build_zip(
            &archive,
            &[
                ("renewd", b"bin"),
                ("renewd.toml", b"cfg"),
                ("share/readme.txt", b"docs"),
            ],
        );
        let stager = stager(dir.path());
        let staged = stager.extract(&archive).unwrap();
        assert_eq!(staged.entries, 3);
        assert_eq!(fs::read(staged.path.join("share/readme.txt")).unwrap(), b"docs");
        stager.verify(&staged).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(staged.path.join("renewd")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn missing_required_entry_fails_verification() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        build_zip(&archive, &[("renewd.toml", b"cfg")]);
        let stager = stager(dir.path());
        let staged = stager.extract(&archive).unwrap();
        match stager.verify(&staged) {
            Err(UpdateError::MissingEntries { missing, .. }) => {
                assert_eq!(missing, vec!["renewd".to_owned()])
            }
            other => panic!("unexpected verification result: {other:?}"),
        }
        stager.discard(&staged);
        assert!(!staged.path.exists());
    }

    #[test]
    fn nested_executable_does_not_satisfy_root_requirement() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        build_zip(&archive, &[("bin/renewd", b"bin"), ("renewd.toml", b"cfg")]);
        let stager = stager(dir.path());
        let staged = stager.extract(&archive).unwrap();
        assert!(stager.verify(&staged).is_err());
    }

    #[test]
    fn escaping_entry_aborts_and_cleans_up() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        build_zip(&archive, &[("renewd", b"bin"), ("../evil", b"x")]);
        let stager = stager(dir.path());
        let result = stager.extract(&archive);
        assert!(matches!(result, Err(UpdateError::UnsafeEntry { .. })));
        assert!(!dir.path().join("evil").exists());
        assert!(stager.prune(0).unwrap().is_empty());
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();
        let result = stager(dir.path()).extract(&archive);
        assert!(matches!(result, Err(UpdateError::Archive { .. })));
    }
}
