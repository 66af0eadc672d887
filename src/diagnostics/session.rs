//! Diagnostics record for one HTTP transaction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Everything captured about one transaction. All fields are optional and
/// stay unset when the transaction ends before reaching the matching stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsWebSession {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// URL as the client sent it.
    pub client_request_uri: Option<String>,
    /// URL dispatched upstream, after callbacks had their say.
    pub server_request_uri: Option<String>,

    pub client_request_headers: Option<String>,
    pub client_request_body: Option<Vec<u8>>,

    pub server_request_headers: Option<String>,
    pub server_request_body: Option<Vec<u8>>,

    /// Upstream status, if a response arrived.
    pub status_code: Option<u16>,
    pub server_response_headers: Option<String>,
    pub server_response_body: Option<Vec<u8>>,
}

impl DiagnosticsWebSession {
    /// Wall time between start and end, once both are stamped.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        let session = DiagnosticsWebSession::default();
        assert!(session.started_at.is_none());
        assert!(session.duration().is_none());
        assert!(!session.is_finished());
    }

    #[test]
    fn test_duration() {
        let start = Utc::now();
        let session = DiagnosticsWebSession {
            started_at: Some(start),
            ended_at: Some(start + Duration::milliseconds(250)),
            ..Default::default()
        };
        assert_eq!(session.duration(), Some(Duration::milliseconds(250)));
    }

    #[test]
    fn test_json_shape() {
        let session = DiagnosticsWebSession {
            client_request_uri: Some("http://example.com/".to_string()),
            status_code: Some(204),
            ..Default::default()
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["client_request_uri"], "http://example.com/");
        assert_eq!(json["status_code"], 204);
        assert!(json["server_response_body"].is_null());

        let parsed: DiagnosticsWebSession =
            serde_json::from_str(r#"{"status_code": 200}"#).unwrap();
        assert_eq!(parsed.status_code, Some(200));
    }
}
