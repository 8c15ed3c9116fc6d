//! Test helper utilities for running builds without network or Python

use rbit_epub::config::BuildSettings;
use rbit_epub::models::job::BuildPhase;
use rbit_epub::services::fetcher::{ArchiveFetcher, FetchError};
use rbit_epub::services::status::RecordingStatusSink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Arguments a fetcher was called with.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub package: String,
    pub version: String,
    pub base_uri: String,
}

/// Fetcher that fabricates an unpacked collection instead of downloading it.
pub struct FakeFetcher {
    dir_name: String,
    fail: bool,
    calls: AtomicUsize,
    last_call: Mutex<Option<FetchCall>>,
}

impl FakeFetcher {
    /// Unpacks to `<dest>/<dir_name>`.
    pub fn unpacking_to(dir_name: &str) -> Self {
        Self {
            dir_name: dir_name.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
            last_call: Mutex::new(None),
        }
    }

    /// Fails every fetch.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::unpacking_to("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<FetchCall> {
        self.last_call.lock().unwrap().clone()
    }
}

impl ArchiveFetcher for FakeFetcher {
    async fn fetch(
        &self,
        package: &str,
        version: &str,
        base_uri: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap() = Some(FetchCall {
            package: package.to_string(),
            version: version.to_string(),
            base_uri: base_uri.to_string(),
        });

        if self.fail {
            return Err(FetchError::Layout("archive server returned garbage".to_string()));
        }

        let dir = dest.join(&self.dir_name);
        tokio::fs::create_dir_all(dir.join("m1")).await?;
        tokio::fs::write(dir.join("collection.xml"), b"<col/>").await?;
        tokio::fs::write(dir.join("m1").join("index.cnxml"), b"<document/>").await?;
        Ok(dir)
    }
}

/// Scratch layout for one test: a fake oer.exports checkout, an output
/// directory and a root for working directories.
pub struct BuildSandbox {
    pub root: TempDir,
}

impl BuildSandbox {
    /// Install `script` as `content2epub.py` (run with `sh`).
    pub fn with_tool(script: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let exports = root.path().join("oer.exports");
        std::fs::create_dir_all(exports.join("static")).unwrap();
        std::fs::create_dir_all(exports.join("xsl")).unwrap();
        std::fs::write(exports.join("static/content.css"), b"body {}").unwrap();
        std::fs::write(exports.join("xsl/dbk2epub.xsl"), b"<xsl:stylesheet/>").unwrap();
        std::fs::write(exports.join("content2epub.py"), script).unwrap();
        std::fs::create_dir_all(root.path().join("work")).unwrap();
        Self { root }
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.path().join("oer.exports")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("output")
    }

    pub fn work_root(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn settings(&self) -> BuildSettings {
        BuildSettings::new(self.exports_dir(), self.output_dir()).with_python("sh")
    }

    /// Working directories currently left under the work root.
    pub fn leftover_workdirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

/// Assert the recorded history is some `Building` updates followed by exactly
/// one terminal status, and return that terminal phase.
pub fn assert_single_terminal(sink: &RecordingStatusSink) -> BuildPhase {
    let phases = sink.phases();
    let (last, rest) = phases.split_last().expect("no status was reported");
    assert!(last.is_terminal(), "history does not end terminally: {phases:?}");
    assert!(
        rest.iter().all(|p| *p == BuildPhase::Building),
        "non-Building status before the end: {phases:?}"
    );
    *last
}
