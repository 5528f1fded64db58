use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One execution log record as persisted by the log store.
///
/// Created when a step starts; `exit_code` and `duration_ms` are filled in when it is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub key: String,
    pub command: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub out: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionLogEntry {
    pub fn new(key: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            key: key.into(),
            command,
            start_time: OffsetDateTime::now_utc(),
            exit_code: None,
            out: String::new(),
            duration_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_entry_omits_exit_code() {
        let entry = ExecutionLogEntry::new("step.docker.0", vec!["docker".into()]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["key"], "step.docker.0");
        assert!(json.get("exitCode").is_none());
        assert!(json.get("durationMs").is_none());
        assert!(json["startTime"].is_string());
    }

    #[test]
    fn start_time_is_rfc3339() {
        let json = r#"{"key":"k","command":[],"startTime":"2024-05-01T12:30:00.250Z","out":"","exitCode":0}"#;
        let entry: ExecutionLogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.start_time.unix_timestamp(), 1_714_566_600);
        assert_eq!(entry.start_time.millisecond(), 250);
        assert_eq!(entry.exit_code, Some(0));

        let back = serde_json::to_value(&entry).unwrap();
        let text = back["startTime"].as_str().unwrap();
        assert!(text.starts_with("2024-05-01T12:30:00.25"), "{text}");
        assert!(text.ends_with('Z'), "{text}");
    }
}
