use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Interpreter used to run `content2epub.py` when `python` is not set.
pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Redis connection string for the job queue and status store
    pub redis_url: String,

    /// Prometheus exporter listen address (e.g., "0.0.0.0:9100")
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Delay between queue polls when no job is waiting
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

/// Settings as they arrive, either from a settings map keyed like
/// `oer.exports-dir` or from the environment (`OER_EXPORTS_DIR`).
#[derive(Debug, Default, Deserialize)]
struct RawBuildSettings {
    python: Option<String>,

    #[serde(rename = "oer.exports-dir", alias = "oer_exports_dir")]
    oer_exports_dir: Option<PathBuf>,

    #[serde(rename = "output-dir", alias = "output_dir")]
    output_dir: Option<PathBuf>,

    #[serde(rename = "tool-timeout-secs", alias = "tool_timeout_secs")]
    tool_timeout_secs: Option<u64>,

    #[serde(rename = "fetch-timeout-secs", alias = "fetch_timeout_secs")]
    fetch_timeout_secs: Option<u64>,

    #[serde(rename = "cleanup-failed-builds", alias = "cleanup_failed_builds", default)]
    cleanup_failed_builds: bool,
}

/// Validated settings for the EPUB build runner.
///
/// A value of this type always carries both required directories, so a runner
/// built from it can never start a fetch with incomplete configuration.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Interpreter the conversion tool is run with.
    pub python: String,
    /// Root of the oer.exports checkout holding `content2epub.py`.
    pub oer_exports_dir: PathBuf,
    /// Where finished EPUB files are placed.
    pub output_dir: PathBuf,
    /// Kill the conversion tool after this long. `None` waits indefinitely.
    pub tool_timeout: Option<Duration>,
    /// Overall timeout for downloading a collection archive.
    pub fetch_timeout: Option<Duration>,
    /// Remove the working directory of builds whose tool run failed.
    pub cleanup_failed_builds: bool,
}

impl BuildSettings {
    pub fn new(oer_exports_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: DEFAULT_PYTHON.to_string(),
            oer_exports_dir: oer_exports_dir.into(),
            output_dir: output_dir.into(),
            tool_timeout: None,
            fetch_timeout: None,
            cleanup_failed_builds: false,
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_cleanup_failed_builds(mut self, cleanup: bool) -> Self {
        self.cleanup_failed_builds = cleanup;
        self
    }

    /// Build settings from key/value pairs such as
    /// `[("oer.exports-dir", "/opt/oer.exports"), ("output-dir", "/srv/epub")]`.
    pub fn from_settings<I, K, V>(settings: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let raw: RawBuildSettings =
            envy::from_iter(settings.into_iter().map(|(k, v)| (k.into(), v.into())))?;
        Self::from_raw(raw)
    }

    /// Build settings from `PYTHON`, `OER_EXPORTS_DIR`, `OUTPUT_DIR` and the
    /// optional tuning variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let raw: RawBuildSettings = envy::from_env()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawBuildSettings) -> Result<Self, ConfigError> {
        let oer_exports_dir = required_dir(raw.oer_exports_dir, "oer.exports-dir")?;
        let output_dir = required_dir(raw.output_dir, "output-dir")?;

        let python = raw
            .python
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PYTHON.to_string());

        Ok(Self {
            python,
            oer_exports_dir,
            output_dir,
            tool_timeout: raw.tool_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            fetch_timeout: raw.fetch_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            cleanup_failed_builds: raw.cleanup_failed_builds,
        })
    }

    /// Path of the conversion script inside the oer.exports checkout.
    pub fn build_script(&self) -> PathBuf {
        self.oer_exports_dir.join("content2epub.py")
    }

    pub fn stylesheet(&self) -> PathBuf {
        self.oer_exports_dir.join("static").join("content.css")
    }

    pub fn transform(&self) -> PathBuf {
        self.oer_exports_dir.join("xsl").join("dbk2epub.xsl")
    }
}

fn required_dir(value: Option<PathBuf>, key: &'static str) -> Result<PathBuf, ConfigError> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(ConfigError::MissingSetting(key)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting '{0}'")]
    MissingSetting(&'static str),

    #[error("Invalid settings: {0}")]
    Env(#[from] envy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_map() {
        let settings = BuildSettings::from_settings([
            ("python", "/usr/bin/python2"),
            ("oer.exports-dir", "/opt/oer.exports"),
            ("output-dir", "/srv/epub"),
        ])
        .unwrap();

        assert_eq!(settings.python, "/usr/bin/python2");
        assert_eq!(settings.oer_exports_dir, PathBuf::from("/opt/oer.exports"));
        assert_eq!(settings.output_dir, PathBuf::from("/srv/epub"));
        assert!(settings.tool_timeout.is_none());
        assert!(!settings.cleanup_failed_builds);
    }

    #[test]
    fn test_python_defaults_when_absent() {
        let settings = BuildSettings::from_settings([
            ("oer.exports-dir", "/opt/oer.exports"),
            ("output-dir", "/srv/epub"),
        ])
        .unwrap();
        assert_eq!(settings.python, DEFAULT_PYTHON);
    }

    #[test]
    fn test_missing_output_dir_is_fatal() {
        let err = BuildSettings::from_settings([("oer.exports-dir", "/opt/oer.exports")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting("output-dir")));
    }

    #[test]
    fn test_missing_exports_dir_is_fatal() {
        let err = BuildSettings::from_settings([("output-dir", "/srv/epub")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting("oer.exports-dir")));
    }

    #[test]
    fn test_empty_required_value_is_missing() {
        let err = BuildSettings::from_settings([
            ("oer.exports-dir", "/opt/oer.exports"),
            ("output-dir", ""),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting("output-dir")));
    }

    #[test]
    fn test_env_style_keys_and_tuning() {
        let settings = BuildSettings::from_settings([
            ("OER_EXPORTS_DIR", "/opt/oer.exports"),
            ("OUTPUT_DIR", "/srv/epub"),
            ("TOOL_TIMEOUT_SECS", "90"),
            ("CLEANUP_FAILED_BUILDS", "true"),
        ])
        .unwrap();
        assert_eq!(settings.tool_timeout, Some(Duration::from_secs(90)));
        assert!(settings.cleanup_failed_builds);
    }

    #[test]
    fn test_tool_paths() {
        let settings = BuildSettings::new("/opt/oer.exports", "/srv/epub");
        assert_eq!(settings.build_script(), PathBuf::from("/opt/oer.exports/content2epub.py"));
        assert_eq!(settings.stylesheet(), PathBuf::from("/opt/oer.exports/static/content.css"));
        assert_eq!(settings.transform(), PathBuf::from("/opt/oer.exports/xsl/dbk2epub.xsl"));
    }
}
