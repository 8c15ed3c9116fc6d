use std::collections::BTreeSet;
use std::fs::File;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Url};
use zip::ZipArchive;

/// Materializes a collection in a build's working directory.
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch `package` at `version` from `base_uri` and unpack it under
    /// `dest`. Returns the unpacked collection directory, named
    /// `<id>_<version>_complete` with the concrete version even when
    /// `version` was `latest`.
    fn fetch(
        &self,
        package: &str,
        version: &str,
        base_uri: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<PathBuf, FetchError>> + Send;
}

impl<T: ArchiveFetcher> ArchiveFetcher for Arc<T> {
    fn fetch(
        &self,
        package: &str,
        version: &str,
        base_uri: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<PathBuf, FetchError>> + Send {
        (**self).fetch(package, version, base_uri, dest)
    }
}

/// Downloads the "complete zip" of a collection over HTTP.
pub struct HttpArchiveFetcher {
    http: Client,
}

impl HttpArchiveFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }

    /// Only http and https transports can be downloaded.
    fn ensure_http(base_uri: &str) -> Result<(), FetchError> {
        let unsupported = || FetchError::UnsupportedUri(base_uri.to_string());
        let url = Url::parse(base_uri).map_err(|_| unsupported())?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            _ => Err(unsupported()),
        }
    }

    /// `<base_uri>/content/<package>/<version>/complete`
    pub fn complete_zip_url(base_uri: &str, package: &str, version: &str) -> String {
        format!(
            "{}/content/{}/{}/complete",
            base_uri.trim_end_matches('/'),
            package,
            version
        )
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(
        &self,
        package: &str,
        version: &str,
        base_uri: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        Self::ensure_http(base_uri)?;
        let url = Self::complete_zip_url(base_uri, package, version);
        tracing::debug!(url = %url, "Downloading complete zip");

        let response = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let archive_path = dest.join(format!("{package}_{version}_complete.zip"));
        tokio::fs::write(&archive_path, &body).await?;
        tracing::debug!(
            archive = %archive_path.display(),
            bytes = body.len(),
            "Complete zip saved"
        );

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &dest)).await?
    }
}

/// Extract a zip archive into `dest` and return its single top-level
/// directory.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<PathBuf, FetchError> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;

    let mut roots = BTreeSet::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry
            .enclosed_name()
            .ok_or_else(|| FetchError::UnsafeEntry(entry.name().to_string()))?;
        if let Some(Component::Normal(root)) = name.components().next() {
            roots.insert(root.to_os_string());
        }
    }

    let root = match roots.len() {
        1 => roots.into_iter().next(),
        _ => None,
    }
    .ok_or_else(|| {
        FetchError::Layout(format!(
            "expected one top-level directory in {}",
            archive_path.display()
        ))
    })?;

    archive.extract(dest)?;

    let collection_dir = dest.join(root);
    if !collection_dir.is_dir() {
        return Err(FetchError::Layout(format!(
            "{} is not a directory",
            collection_dir.display()
        )));
    }
    Ok(collection_dir)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not an http or https URI: {0}")]
    UnsupportedUri(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the destination: {0}")]
    UnsafeEntry(String),

    #[error("Unexpected archive layout: {0}")]
    Layout(String),

    #[error("Unpack task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
