use std::path::Path;

use crate::models::request::LATEST_VERSION;

/// Suffix of the directory a complete-zip unpacks to.
pub const COMPLETE_SUFFIX: &str = "_complete";

/// Parse the concrete version out of an unpacked collection directory name.
///
/// The fetcher names the directory `<id>_<version>_complete`, for example
/// `col123_2.1_complete`. Neither `<id>` nor `<version>` may be empty or contain
/// `_`; anything else is rejected rather than guessed at.
pub fn resolve_version(directory_name: &str) -> Result<String, VersionError> {
    let mismatch = || VersionError::PatternMismatch(directory_name.to_string());

    let stem = directory_name
        .strip_suffix(COMPLETE_SUFFIX)
        .ok_or_else(mismatch)?;
    let (id, version) = stem.split_once('_').ok_or_else(mismatch)?;

    if id.is_empty() || version.is_empty() || version.contains('_') {
        return Err(mismatch());
    }

    Ok(version.to_string())
}

/// Version used for naming the output: the requested one, unless it was the
/// symbolic `latest`, in which case it is read off the fetched directory.
pub fn resolve_requested_version(
    requested: &str,
    collection_dir: &Path,
) -> Result<String, VersionError> {
    if requested != LATEST_VERSION {
        return Ok(requested.to_string());
    }

    let name = collection_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VersionError::PatternMismatch(collection_dir.display().to_string()))?;
    resolve_version(name)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VersionError {
    #[error("Collection directory '{0}' does not match <id>_<version>_complete")]
    PatternMismatch(String),
}
