//! Drives a single EPUB build from request message to terminal status.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{BuildSettings, ConfigError};
use crate::models::job::{BuildPhase, JobOutcome};
use crate::models::request::{BuildRequest, DecodeError};
use crate::services::converter::{ConversionCommand, ConversionTool, ConvertError};
use crate::services::fetcher::{ArchiveFetcher, FetchError, HttpArchiveFetcher};
use crate::services::status::{StatusError, StatusReporter, StatusSink};
use crate::services::version::{resolve_requested_version, VersionError};
use crate::services::workspace::WorkingDirectory;

/// File name of the finished book: `<package>-<version>.epub`.
pub fn output_filename(package: &str, version: &str) -> String {
    format!("{package}-{version}.epub")
}

/// Runs build jobs against one oer.exports installation.
pub struct BuildJobRunner<F> {
    settings: BuildSettings,
    fetcher: F,
    tool: ConversionTool,
    workspace_root: Option<PathBuf>,
}

impl<F: ArchiveFetcher> BuildJobRunner<F> {
    pub fn new(settings: BuildSettings, fetcher: F) -> Self {
        let tool = ConversionTool::new(settings.tool_timeout);
        Self {
            settings,
            fetcher,
            tool,
            workspace_root: None,
        }
    }

    /// Validate raw settings and build a runner. Fails before the fetcher is
    /// ever used when a required setting is missing.
    pub fn from_settings<I, K, V>(settings: I, fetcher: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Ok(Self::new(BuildSettings::from_settings(settings)?, fetcher))
    }

    /// Create working directories under `root` instead of the system temp dir.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Run one build job.
    ///
    /// Emits `Building` updates as the job progresses and exactly one `Done`
    /// or `Failed` when it returns `Ok`. A conversion tool that exits non-zero
    /// (or times out) is reported as `Failed` and returned as
    /// [`JobOutcome::Failed`]. Any other error is returned without a terminal
    /// status; the caller is responsible for reporting it.
    pub async fn run<S: StatusSink>(&self, message: &str, status: &S) -> Result<JobOutcome, BuildError> {
        let mut request = BuildRequest::decode(message)?;
        request.stamp_request();

        let reporter = StatusReporter::new(status);
        reporter
            .building(&format!("Starting job, timestamp: {}", request.buildstamp()))
            .await?;

        let workdir = match &self.workspace_root {
            Some(root) => WorkingDirectory::create_in(root),
            None => WorkingDirectory::create(),
        }
        .map_err(BuildError::Workspace)?;
        tracing::debug!(workdir = %workdir.path().display(), "Working directory created");

        let collection_dir = self
            .fetcher
            .fetch(
                request.package(),
                request.version(),
                &request.transport.uri,
                workdir.path(),
            )
            .await?;

        let version = resolve_requested_version(request.version(), &collection_dir)?;
        tracing::info!(
            package = request.package(),
            requested_version = request.version(),
            version = %version,
            "Collection fetched"
        );

        let result_filename = output_filename(request.package(), &version);
        let result_path = workdir.join(&result_filename);
        let command = ConversionCommand::epub(&self.settings, &collection_dir, &result_path);

        reporter
            .building(&format!("Running: {}", command.display()))
            .await?;

        let output = match self.tool.run(&command, workdir.path()).await {
            Ok(output) => output,
            Err(err @ ConvertError::Timeout(_)) => {
                return self.fail(reporter, workdir, err.to_string().into_bytes()).await;
            }
            Err(err) => return Err(err.into()),
        };

        if !output.success {
            tracing::warn!(code = ?output.code, "Conversion tool failed");
            return self.fail(reporter, workdir, output.stderr).await;
        }

        reporter
            .building("EPUB created, moving contents to final destination...")
            .await?;

        let artifact = publish_artifact(&result_path, &self.settings.output_dir)
            .await
            .map_err(BuildError::Publish)?;
        reporter
            .building(&format!("Placing file at location: {}", artifact.display()))
            .await?;

        workdir.remove().map_err(BuildError::Cleanup)?;

        reporter.done().await?;
        Ok(JobOutcome::Completed { artifact })
    }

    async fn fail<S: StatusSink>(
        &self,
        reporter: StatusReporter<'_, S>,
        workdir: WorkingDirectory,
        reason: Vec<u8>,
    ) -> Result<JobOutcome, BuildError> {
        reporter.failed(&reason).await?;

        let workspace = if self.settings.cleanup_failed_builds {
            if let Err(e) = workdir.remove() {
                tracing::warn!(error = %e, "Failed to remove working directory of failed build");
            }
            None
        } else {
            let kept = workdir.retain();
            tracing::info!(workdir = %kept.display(), "Keeping working directory of failed build");
            Some(kept)
        };

        Ok(JobOutcome::Failed { reason, workspace })
    }
}

/// How a build that ended in an error was settled in the status store.
#[derive(Debug)]
pub enum FailureReport {
    /// `Failed` was recorded with the error text.
    Recorded,
    /// The job had already reached `Done` or `Failed`.
    AlreadyTerminal,
    /// The status store could not be read or written.
    Unrecorded(StatusError),
}

/// Record `Failed` for a job whose run returned `error`, unless a terminal
/// status is already stored.
///
/// Status store errors are handed back in the report instead of being
/// propagated, so the caller can log them and still release the job.
pub async fn report_build_error<S: StatusSink>(status: &S, error: &BuildError) -> FailureReport {
    match status.terminal_recorded().await {
        Ok(true) => return FailureReport::AlreadyTerminal,
        Ok(false) => {}
        // Only a failed status write can hide a terminal status that was sent
        Err(e) if matches!(error, BuildError::Status(_)) => return FailureReport::Unrecorded(e),
        Err(e) => tracing::warn!(error = %e, "Could not read job status, recording Failed anyway"),
    }

    match status
        .set_status(BuildPhase::Failed, error.to_string().as_bytes())
        .await
    {
        Ok(()) => FailureReport::Recorded,
        Err(e) => FailureReport::Unrecorded(e),
    }
}

/// Run a build with settings given as key/value pairs, fetching the
/// collection over HTTP.
pub async fn make_epub<S, I, K, V>(message: &str, status: &S, settings: I) -> Result<JobOutcome, BuildError>
where
    S: StatusSink,
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let settings = BuildSettings::from_settings(settings)?;
    let fetcher = HttpArchiveFetcher::new(settings.fetch_timeout)?;
    BuildJobRunner::new(settings, fetcher).run(message, status).await
}

/// Copy the finished book into `output_dir`, keeping its permissions and
/// timestamps. Returns the destination path.
pub async fn publish_artifact(source: &Path, output_dir: &Path) -> io::Result<PathBuf> {
    let source = source.to_path_buf();
    let output_dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || copy_preserving_metadata(&source, &output_dir))
        .await
        .map_err(io::Error::other)?
}

fn copy_preserving_metadata(source: &Path, output_dir: &Path) -> io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"))?;

    fs::create_dir_all(output_dir)?;
    let dest = output_dir.join(file_name);
    fs::copy(source, &dest)?;

    let meta = fs::metadata(source)?;
    let times = FileTimes::new()
        .set_accessed(meta.accessed()?)
        .set_modified(meta.modified()?);
    open_for_times(&dest)?.set_times(times)?;

    Ok(dest)
}

/// Open `path` with just enough access to change its timestamps, which also
/// works when the copied permissions made it read-only.
fn open_for_times(path: &Path) -> io::Result<File> {
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_WRITE_ATTRIBUTES: u32 = 0x0100;
        File::options().access_mode(FILE_WRITE_ATTRIBUTES).open(path)
    }
    #[cfg(not(windows))]
    {
        File::open(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to create working directory: {0}")]
    Workspace(#[source] io::Error),

    #[error("Failed to fetch collection: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Failed to place EPUB in output directory: {0}")]
    Publish(#[source] io::Error),

    #[error("Failed to remove working directory: {0}")]
    Cleanup(#[source] io::Error),

    #[error("Failed to report status: {0}")]
    Status(#[from] StatusError),
}
