//! Network traces captured at request dispatch and merged with completions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Millis;

/// Lifecycle of a traced request. Leaves `Pending` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TraceStatus {
    Pending,
    #[serde(rename_all = "camelCase")]
    Completed { status: u16, completed_at: Millis },
    #[serde(rename_all = "camelCase")]
    Failed { reason: String, completed_at: Millis },
}

/// Resource Timing marks for one request, relative to the page time origin.
///
/// Cross-origin responses without `Timing-Allow-Origin` report zeros for
/// everything but `start_time`/`response_end`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportTiming {
    pub start_time: f64,
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub secure_connection_start: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
}

/// Duration of a request split into transport phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingBreakdown {
    pub total_ms: f64,
    pub lookup_ms: Option<f64>,
    pub connect_ms: Option<f64>,
    pub handshake_ms: Option<f64>,
    pub first_byte_ms: Option<f64>,
    pub transfer_ms: Option<f64>,
}

/// A request observed on the page, with the call stack captured at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTrace {
    pub id: String,
    /// Correlation id generated page-side at dispatch.
    pub request_id: Option<String>,
    pub url: String,
    pub method: String,
    pub dispatched_at: Millis,
    /// Raw stack lines captured synchronously at the call site.
    pub stack: Vec<String>,
    pub status: TraceStatus,
    pub duration_ms: Option<f64>,
    pub request_headers: BTreeMap<String, String>,
    pub response_headers: BTreeMap<String, String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub timing: Option<TransportTiming>,
    /// Set when the completion was attributed under ambiguity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_note: Option<String>,
}

impl NetworkTrace {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, TraceStatus::Pending)
    }

    /// Transport failure or an HTTP error status.
    pub fn is_failure(&self) -> bool {
        match &self.status {
            TraceStatus::Failed { .. } => true,
            TraceStatus::Completed { status, .. } => *status >= 400,
            TraceStatus::Pending => false,
        }
    }

    pub fn completed_at(&self) -> Option<Millis> {
        match &self.status {
            TraceStatus::Completed { completed_at, .. }
            | TraceStatus::Failed { completed_at, .. } => Some(*completed_at),
            TraceStatus::Pending => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match &self.status {
            TraceStatus::Completed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(status: TraceStatus) -> NetworkTrace {
        NetworkTrace {
            id: "t1".into(),
            request_id: None,
            url: "https://api.example.com/users".into(),
            method: "GET".into(),
            dispatched_at: 10.0,
            stack: Vec::new(),
            status,
            duration_ms: None,
            request_headers: BTreeMap::new(),
            response_headers: BTreeMap::new(),
            request_body: None,
            response_body: None,
            timing: None,
            correlation_note: None,
        }
    }

    #[test]
    fn test_failure_classification() {
        assert!(!trace(TraceStatus::Pending).is_failure());
        assert!(!trace(TraceStatus::Completed {
            status: 204,
            completed_at: 20.0
        })
        .is_failure());
        assert!(trace(TraceStatus::Completed {
            status: 503,
            completed_at: 20.0
        })
        .is_failure());
        assert!(trace(TraceStatus::Failed {
            reason: "net::ERR_CONNECTION_RESET".into(),
            completed_at: 20.0
        })
        .is_failure());
    }

    #[test]
    fn test_status_wire_shape() {
        let json = serde_json::to_value(TraceStatus::Completed {
            status: 200,
            completed_at: 42.0,
        })
        .unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["completedAt"], 42.0);
    }

    #[test]
    fn test_transport_timing_defaults_missing_fields() {
        let timing: TransportTiming =
            serde_json::from_value(serde_json::json!({"startTime": 5.0, "responseEnd": 9.0}))
                .unwrap();
        assert_eq!(timing.domain_lookup_start, 0.0);
        assert_eq!(timing.response_end, 9.0);
    }
}
