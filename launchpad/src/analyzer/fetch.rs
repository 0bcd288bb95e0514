//! Repository fetching and archive extraction

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::scan;
use crate::errors::DeployError;
use crate::models::request::RepoSource;

/// Branches tried, in order, for GitHub URLs without an archive path
pub const GITHUB_BRANCHES: [&str; 3] = ["main", "master", "develop"];

/// Names that mark a directory as a repository root, besides manifests and
/// entry files
const ROOT_MARKERS: &[&str] = &["README.md", ".gitignore", ".git", "app", "src", "Dockerfile"];

/// Recognized archive encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    /// Sniff the format from magic bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            return Some(ArchiveFormat::Zip);
        }
        if bytes.starts_with(&[0x1f, 0x8b]) {
            return Some(ArchiveFormat::TarGz);
        }
        if bytes.len() > 262 && &bytes[257..262] == b"ustar" {
            return Some(ArchiveFormat::Tar);
        }
        None
    }
}

/// Downloads or reads repository archives
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Read the archive bytes for a repository source
    pub async fn fetch(
        &self,
        source: &RepoSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DeployError> {
        match source {
            RepoSource::Archive(path) => read_local(path).await,
            RepoSource::Url(url) => {
                tokio::select! {
                    result = self.download(url) => result,
                    _ = cancel.cancelled() => Err(DeployError::Cancelled),
                }
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DeployError> {
        let mut last_error = String::new();

        for candidate in archive_urls(url) {
            debug!("Downloading repository archive {}", candidate);
            let response = match self.client.get(&candidate).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = format!("{}: {}", candidate, e);
                    continue;
                }
            };

            if !response.status().is_success() {
                last_error = format!("{}: HTTP {}", candidate, response.status());
                continue;
            }

            let bytes = response.bytes().await?;
            info!("Downloaded {} bytes from {}", bytes.len(), candidate);
            return Ok(bytes.to_vec());
        }

        Err(DeployError::RepositoryUnavailable(last_error))
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DeployError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            DeployError::RepositoryUnavailable(format!("{} does not exist", path.display()))
        }
        _ => DeployError::RepositoryUnavailable(format!("{}: {}", path.display(), e)),
    })?;
    if meta.is_dir() {
        return Err(DeployError::UnsupportedArchiveFormat(format!(
            "{} is a directory, not an archive",
            path.display()
        )));
    }
    tokio::fs::read(path).await.map_err(|e| {
        DeployError::RepositoryUnavailable(format!("unable to read {}: {}", path.display(), e))
    })
}

/// Archive URLs to try for a repository URL
///
/// A GitHub repository page expands to one branch archive per entry of
/// `GITHUB_BRANCHES`; anything else is used as is.
pub fn archive_urls(url: &str) -> Vec<String> {
    let trimmed = url.trim_end_matches('/');
    let is_github = url::Url::parse(trimmed)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "github.com" || h == "www.github.com"))
        .unwrap_or(false);

    if !is_github || trimmed.contains("/archive/") || has_archive_suffix(trimmed) {
        return vec![url.to_string()];
    }

    let base = trimmed.trim_end_matches(".git");
    GITHUB_BRANCHES
        .iter()
        .map(|branch| format!("{}/archive/{}.zip", base, branch))
        .collect()
}

fn has_archive_suffix(url: &str) -> bool {
    [".zip", ".tar.gz", ".tgz", ".tar"]
        .iter()
        .any(|suffix| url.ends_with(suffix))
}

/// Extract archive bytes into `dest` and return the repository root
///
/// When the archive holds a single top-level directory that directory is
/// the root.
pub async fn extract(bytes: Vec<u8>, dest: PathBuf) -> Result<PathBuf, DeployError> {
    tokio::task::spawn_blocking(move || extract_blocking(&bytes, &dest))
        .await
        .map_err(|e| DeployError::Internal(format!("extraction task failed: {}", e)))?
}

fn extract_blocking(bytes: &[u8], dest: &Path) -> Result<PathBuf, DeployError> {
    let format = ArchiveFormat::detect(bytes).ok_or_else(|| {
        DeployError::UnsupportedArchiveFormat("not a zip, tar or tar.gz archive".to_string())
    })?;

    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Zip => extract_zip(bytes, dest)?,
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(bytes), dest)?,
        ArchiveFormat::Tar => extract_tar(bytes, dest)?,
    }

    single_top_level_dir(dest)
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<(), DeployError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DeployError::UnsupportedArchiveFormat(format!("invalid zip: {}", e)))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| DeployError::UnsupportedArchiveFormat(format!("invalid zip: {}", e)))?;

        // Entries escaping the destination are dropped
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<(), DeployError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| DeployError::UnsupportedArchiveFormat(format!("invalid tar: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| DeployError::UnsupportedArchiveFormat(format!("invalid tar: {}", e)))?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
            continue;
        }
        // unpack_in refuses paths outside dest
        if !entry.unpack_in(dest)? {
            warn!("Skipping unsafe archive entry");
        }
    }

    Ok(())
}

/// The lone top-level directory when it looks like a repository root
fn single_top_level_dir(dest: &Path) -> Result<PathBuf, DeployError> {
    let mut entries = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();

    if entries.len() == 1 && entries[0].is_dir() && has_root_marker(&entries[0])? {
        return Ok(entries.remove(0));
    }
    Ok(dest.to_path_buf())
}

fn has_root_marker(dir: &Path) -> Result<bool, DeployError> {
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if ROOT_MARKERS.contains(&&*name) || scan::is_root_marker(&name) {
            return Ok(true);
        }
    }
    Ok(false)
}
