//! Invocation of the oer.exports `content2epub.py` conversion script.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::BuildSettings;

/// Template type passed with `-t`; builds always convert whole collections.
pub const TEMPLATE_TYPE: &str = "collection";

/// A fully specified conversion tool command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ConversionCommand {
    /// `<python> <exports>/content2epub.py <collection_dir> -t collection
    /// -c <exports>/static/content.css -e <exports>/xsl/dbk2epub.xsl
    /// -o <output_path>`
    pub fn epub(settings: &BuildSettings, collection_dir: &Path, output_path: &Path) -> Self {
        let args = vec![
            settings.build_script().into_os_string(),
            collection_dir.as_os_str().to_owned(),
            "-t".into(),
            TEMPLATE_TYPE.into(),
            "-c".into(),
            settings.stylesheet().into_os_string(),
            "-e".into(),
            settings.transform().into_os_string(),
            "-o".into(),
            output_path.as_os_str().to_owned(),
        ];
        Self {
            program: settings.python.clone().into(),
            args,
        }
    }

    /// The command line joined by single spaces, for status messages.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a tool run that exited on its own. Both streams are
/// kept as raw bytes.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs conversion commands inside a job's working directory.
#[derive(Debug, Clone, Default)]
pub struct ConversionTool {
    timeout: Option<Duration>,
}

impl ConversionTool {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run `command` with `cwd` as its working directory, waiting until it
    /// exits and both output streams are drained.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`ToolOutput::success`]. On timeout the child is killed.
    pub async fn run(&self, command: &ConversionCommand, cwd: &Path) -> Result<ToolOutput, ConvertError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ConvertError::Spawn {
            program: PathBuf::from(&command.program),
            source,
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ConvertError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        tracing::debug!(
            code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Conversion tool exited"
        );

        Ok(ToolOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to wait for conversion tool: {0}")]
    Io(#[from] std::io::Error),
}
