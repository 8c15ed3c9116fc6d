use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Symbolic version meaning "whatever the repository currently publishes".
pub const LATEST_VERSION: &str = "latest";

/// Format of the stamp returned by [`BuildRequest::buildstamp`].
pub const BUILDSTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Where the collection archive is fetched from.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Transport {
    #[garde(length(min = 1, max = 2048))]
    pub uri: String,
}

/// A single EPUB build job as decoded from the queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BuildRequest {
    #[garde(length(min = 1, max = 200), custom(plain_segment))]
    package: String,

    #[garde(length(min = 1, max = 50), custom(plain_segment))]
    version: String,

    #[garde(dive)]
    pub transport: Transport,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    buildstamp: Option<DateTime<Utc>>,
}

impl BuildRequest {
    pub fn new(package: impl Into<String>, version: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            transport: Transport { uri: uri.into() },
            buildstamp: None,
        }
    }

    /// Decode and validate an inbound queue message.
    pub fn decode(message: &str) -> Result<Self, DecodeError> {
        let request: BuildRequest = serde_json::from_str(message)?;
        request.validate()?;
        Ok(request)
    }

    pub fn encode(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST_VERSION
    }

    /// Record the moment the build started.
    pub fn stamp_request(&mut self) {
        self.buildstamp = Some(Utc::now());
    }

    pub fn stamped_at(&self) -> Option<DateTime<Utc>> {
        self.buildstamp
    }

    /// The build stamp as text, empty if the request was never stamped.
    pub fn buildstamp(&self) -> String {
        self.buildstamp
            .map(|ts| ts.format(BUILDSTAMP_FORMAT).to_string())
            .unwrap_or_default()
    }
}

fn plain_segment(value: &str, _ctx: &()) -> garde::Result {
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(garde::Error::new("must not contain path separators"));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed build request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid build request: {0}")]
    Invalid(#[from] garde::Report),
}
