//! Transport phase breakdown from Resource Timing marks.

use pagescope_types::{NetworkTrace, TimingBreakdown, TransportTiming};

fn phase(start: f64, end: f64) -> Option<f64> {
    (start > 0.0 && end >= start).then(|| end - start)
}

/// True when the marks carry more than start/end. Cross-origin responses
/// without `Timing-Allow-Origin` zero every intermediate mark.
fn has_detail(t: &TransportTiming) -> bool {
    [
        t.domain_lookup_start,
        t.connect_start,
        t.request_start,
        t.response_start,
    ]
    .iter()
    .any(|mark| *mark > 0.0)
}

pub fn breakdown(trace: &NetworkTrace) -> TimingBreakdown {
    let timing = trace.timing.as_ref();
    let total_ms = trace
        .duration_ms
        .or_else(|| timing.and_then(|t| phase(t.start_time, t.response_end)))
        .unwrap_or(0.0);

    let Some(t) = timing.filter(|t| has_detail(t)) else {
        return TimingBreakdown {
            total_ms,
            lookup_ms: None,
            connect_ms: None,
            handshake_ms: None,
            first_byte_ms: None,
            transfer_ms: None,
        };
    };

    TimingBreakdown {
        total_ms,
        lookup_ms: phase(t.domain_lookup_start, t.domain_lookup_end),
        connect_ms: phase(t.connect_start, t.connect_end),
        handshake_ms: phase(t.secure_connection_start, t.connect_end),
        first_byte_ms: phase(t.request_start, t.response_start),
        transfer_ms: phase(t.response_start, t.response_end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagescope_types::TraceStatus;
    use std::collections::BTreeMap;

    fn trace(duration_ms: Option<f64>, timing: Option<TransportTiming>) -> NetworkTrace {
        NetworkTrace {
            id: "t".into(),
            request_id: None,
            url: "https://api.test/x".into(),
            method: "GET".into(),
            dispatched_at: 0.0,
            stack: Vec::new(),
            status: TraceStatus::Completed {
                status: 200,
                completed_at: 100.0,
            },
            duration_ms,
            request_headers: BTreeMap::new(),
            response_headers: BTreeMap::new(),
            request_body: None,
            response_body: None,
            timing,
            correlation_note: None,
        }
    }

    #[test]
    fn test_full_breakdown() {
        let timing = TransportTiming {
            start_time: 10.0,
            domain_lookup_start: 11.0,
            domain_lookup_end: 15.0,
            connect_start: 15.0,
            connect_end: 40.0,
            secure_connection_start: 25.0,
            request_start: 41.0,
            response_start: 90.0,
            response_end: 100.0,
        };
        let b = breakdown(&trace(Some(92.0), Some(timing)));
        assert_eq!(b.total_ms, 92.0);
        assert_eq!(b.lookup_ms, Some(4.0));
        assert_eq!(b.connect_ms, Some(25.0));
        assert_eq!(b.handshake_ms, Some(15.0));
        assert_eq!(b.first_byte_ms, Some(49.0));
        assert_eq!(b.transfer_ms, Some(10.0));
    }

    #[test]
    fn test_opaque_cross_origin_timing_reports_total_only() {
        let timing = TransportTiming {
            start_time: 10.0,
            response_end: 60.0,
            ..TransportTiming::default()
        };
        let b = breakdown(&trace(None, Some(timing)));
        assert_eq!(b.total_ms, 50.0);
        assert!(b.lookup_ms.is_none());
        assert!(b.transfer_ms.is_none());
    }

    #[test]
    fn test_plain_http_has_no_handshake() {
        let timing = TransportTiming {
            start_time: 1.0,
            domain_lookup_start: 1.0,
            domain_lookup_end: 1.0,
            connect_start: 1.0,
            connect_end: 1.0,
            request_start: 2.0,
            response_start: 5.0,
            response_end: 6.0,
            ..TransportTiming::default()
        };
        let b = breakdown(&trace(Some(5.0), Some(timing)));
        assert_eq!(b.lookup_ms, Some(0.0));
        assert!(b.handshake_ms.is_none());
    }
}
