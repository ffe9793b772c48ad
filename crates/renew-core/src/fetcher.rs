//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Streaming package download with integrity checks."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use renew_versioning::VersionDescriptor;

use crate::error::{IoResultExt, UpdateError};
use crate::fsutil;

/// Prefix of downloaded package files; retention matches on it.
pub const DOWNLOAD_PREFIX: &str = "update_";

/// What the descriptor promised about the package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactExpectation {
    pub checksum: Option<String>,
    pub size: Option<u64>,
}

impl From<&VersionDescriptor> for ArtifactExpectation {
    fn from(descriptor: &VersionDescriptor) -> Self {
        Self {
            checksum: descriptor.checksum.clone(),
            size: descriptor.file_size,
        }
    }
}

/// A fully downloaded package on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file.
    pub sha256: String,
}

/// Downloads packages into the download directory.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: Client,
    download_dir: PathBuf,
    timeout: Duration,
    enforce_checksum: bool,
}

impl ArtifactFetcher {
    pub fn new(
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
        enforce_checksum: bool,
        user_agent: &str,
    ) -> Result<Self, UpdateError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(UpdateError::Client)?;
        Ok(Self {
            client,
            download_dir: download_dir.into(),
            timeout,
            enforce_checksum,
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download `locator` into a fresh timestamped file.
    ///
    /// Any failure, timeout, or cancellation removes the partial file.
    pub async fn fetch(
        &self,
        locator: &Url,
        expectation: &ArtifactExpectation,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact, UpdateError> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .io_context(|| format!("unable to create {}", self.download_dir.display()))?;
        let path = fsutil::timestamped_path(&self.download_dir, DOWNLOAD_PREFIX, Some("zip"));
        let guard = PartialFile::new(path.clone());
        info!(url = %locator, path = %path.display(), "downloading update package");

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.stream_to(locator, &path)) => match result {
                Ok(written) => written?,
                Err(_) => {
                    return Err(UpdateError::DownloadTimeout {
                        url: locator.clone(),
                        timeout: self.timeout,
                    })
                }
            },
        };
        if written == 0 {
            return Err(UpdateError::EmptyArtifact(path));
        }

        let hashed = path.clone();
        let sha256 = tokio::task::spawn_blocking(move || sha256_file(&hashed)).await??;
        info!(path = %path.display(), bytes = written, sha256 = %sha256, "package downloaded");

        if let Some(size) = expectation.size {
            if size != written {
                warn!(expected = size, actual = written, "package size differs from descriptor");
            }
        }
        self.check_digest(&path, expectation.checksum.as_deref(), &sha256)?;

        guard.keep();
        Ok(FetchedArtifact {
            path,
            size: written,
            sha256,
        })
    }

    async fn stream_to(&self, locator: &Url, path: &Path) -> Result<u64, UpdateError> {
        let download_error = |source: reqwest::Error| UpdateError::Download {
            url: locator.clone(),
            source,
        };
        let mut response = self
            .client
            .get(locator.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(download_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadStatus {
                url: locator.clone(),
                status,
            });
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .io_context(|| format!("unable to create {}", path.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(download_error)? {
            file.write_all(&chunk)
                .await
                .io_context(|| format!("unable to write {}", path.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .io_context(|| format!("unable to flush {}", path.display()))?;
        file.sync_all()
            .await
            .io_context(|| format!("unable to sync {}", path.display()))?;
        debug!(path = %path.display(), bytes = written, "stream complete");
        Ok(written)
    }

    fn check_digest(
        &self,
        path: &Path,
        expected: Option<&str>,
        actual: &str,
    ) -> Result<(), UpdateError> {
        let Some(expected) = expected.map(str::trim).filter(|value| !value.is_empty()) else {
            debug!("descriptor carries no checksum");
            return Ok(());
        };
        if expected.eq_ignore_ascii_case(actual) {
            return Ok(());
        }
        if self.enforce_checksum {
            return Err(UpdateError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_owned(),
                actual: actual.to_owned(),
            });
        }
        warn!(expected, actual, "package checksum mismatch ignored (enforcement disabled)");
        Ok(())
    }
}

/// Hex SHA-256 of a file read in fixed-size blocks.
pub fn sha256_file(path: &Path) -> Result<String, UpdateError> {
    let mut file = File::open(path).io_context(|| format!("unable to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .io_context(|| format!("unable to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Deletes the file on drop unless [`PartialFile::keep`] was called.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial download"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove partial download"),
        }
    }
}
