use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Phase reported for a build job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
pub enum BuildPhase {
    Building,
    Done,
    Failed,
}

impl BuildPhase {
    /// `Done` and `Failed` end a job; nothing is reported after them.
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildPhase::Done | BuildPhase::Failed)
    }
}

/// One entry of a job's status history.
///
/// `message` holds raw bytes: a `Failed` message is the conversion tool's
/// stderr exactly as captured, which need not be UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub phase: BuildPhase,
    #[serde(with = "message_bytes")]
    pub message: Vec<u8>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(phase: BuildPhase, message: impl Into<Vec<u8>>) -> Self {
        Self {
            phase,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// The message for display; invalid UTF-8 is replaced.
    pub fn message_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// Messages are stored as a JSON string when they are valid UTF-8 and as an
/// array of byte values otherwise.
mod message_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(message: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(message) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.collect_seq(message),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Stored::deserialize(deserializer)? {
            Stored::Text(text) => text.into_bytes(),
            Stored::Bytes(bytes) => bytes,
        })
    }
}

/// How a job that ran to a terminal status ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The EPUB was placed at `artifact`.
    Completed { artifact: std::path::PathBuf },
    /// The conversion tool failed with `reason` (its raw stderr, or a
    /// timeout notice); `workspace` is set when the working directory was
    /// kept on disk for inspection.
    Failed {
        reason: Vec<u8>,
        workspace: Option<std::path::PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_phase_names() {
        assert_eq!(BuildPhase::Building.to_string(), "Building");
        assert_eq!(BuildPhase::from_str("Failed").unwrap(), BuildPhase::Failed);
        assert!(BuildPhase::from_str("failed").is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!BuildPhase::Building.is_terminal());
        assert!(BuildPhase::Done.is_terminal());
        assert!(BuildPhase::Failed.is_terminal());
    }

    #[test]
    fn test_status_update_json() {
        let update = StatusUpdate::new(BuildPhase::Done, "");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["phase"], "Done");
        assert_eq!(json["message"], "");
    }

    #[test]
    fn test_status_update_keeps_non_utf8_message() {
        let update = StatusUpdate::new(BuildPhase::Failed, b"caf\xe9 failed\n".as_slice());
        let json = serde_json::to_string(&update).unwrap();
        let back: StatusUpdate = serde_json::from_str(&json).unwrap();

        assert_eq!(back.message, b"caf\xe9 failed\n");
        assert_eq!(back.message_text(), "caf\u{fffd} failed\n");
    }
}
