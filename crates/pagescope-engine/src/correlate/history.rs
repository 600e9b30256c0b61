//! Bounded history of page errors and root-cause ranking over it.

use std::collections::VecDeque;

use parking_lot::Mutex;

use pagescope_types::{
    CauseCandidate, CauseKind, NetworkTrace, RootCauseReport, RuntimeError, SimilarErrors,
    TraceStatus,
};

use super::normalize::normalize_message;

/// Errors forwarded by the page agent, oldest first, bounded.
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<RuntimeError>>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, error: RuntimeError) {
        let mut entries = self.entries.lock();
        // The agent can report one error through both `error` and a
        // rethrown rejection.
        if entries.iter().rev().take(8).any(|e| same_error(e, &error)) {
            return;
        }
        entries.push_back(error);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<RuntimeError> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Recorded errors whose message normalizes to the same pattern.
    ///
    /// `occurrences` counts every entry in the pattern group; `matches`
    /// leaves out `error` itself.
    pub fn find_similar(&self, error: &RuntimeError) -> SimilarErrors {
        let pattern = normalize_message(&error.message);
        let entries = self.entries.lock();
        let group: Vec<&RuntimeError> = entries
            .iter()
            .rev()
            .filter(|e| normalize_message(&e.message) == pattern)
            .collect();
        SimilarErrors {
            occurrences: group.len(),
            matches: group
                .into_iter()
                .filter(|e| !same_error(e, error))
                .cloned()
                .collect(),
            pattern,
        }
    }
}

fn same_error(a: &RuntimeError, b: &RuntimeError) -> bool {
    a.message == b.message && a.timestamp == b.timestamp
}

/// Rank possible causes of `error`.
///
/// `traces` are the requests dispatched inside the window preceding the
/// error. A failed request scores higher the closer it ended to the error;
/// one that failed after the error cannot have caused it and is skipped.
/// A recurring pattern scores higher the more often it was seen.
pub fn rank_causes(
    error: &RuntimeError,
    similar: &SimilarErrors,
    traces: &[NetworkTrace],
    window_ms: u64,
) -> RootCauseReport {
    let window = window_ms.max(1) as f64;
    let mut candidates: Vec<CauseCandidate> = traces
        .iter()
        .filter(|t| t.is_failure())
        .filter_map(|t| {
            let ended = t.completed_at().unwrap_or(t.dispatched_at);
            if ended > error.timestamp {
                return None;
            }
            let gap = error.timestamp - ended;
            let recency = (1.0 - gap / window).clamp(0.0, 1.0);
            Some(CauseCandidate {
                kind: CauseKind::FailedRequest,
                description: describe_failure(t),
                score: 0.4 + 0.6 * recency,
                timestamp: ended,
                trace_id: Some(t.id.clone()),
            })
        })
        .collect();

    // Entries in `matches` exclude the error itself, so add it back when it
    // was never recorded.
    let occurrences = similar.occurrences.max(similar.matches.len() + 1);
    let recurring = occurrences >= 2;
    if recurring {
        let first = similar
            .matches
            .iter()
            .map(|e| e.timestamp)
            .fold(error.timestamp, f64::min);
        candidates.push(CauseCandidate {
            kind: CauseKind::RecurringError,
            description: format!(
                "\"{}\" has occurred {occurrences} times; the first occurrence may point at the origin",
                similar.pattern
            ),
            score: 0.3 + 0.5 * (1.0 - 1.0 / occurrences as f64),
            timestamp: first,
            trace_id: None,
        });
    }

    for c in &mut candidates {
        c.score = c.score.clamp(0.0, 1.0);
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.timestamp.total_cmp(&a.timestamp))
    });

    RootCauseReport {
        pattern: similar.pattern.clone(),
        occurrences,
        recurring,
        candidates,
    }
}

fn describe_failure(trace: &NetworkTrace) -> String {
    match &trace.status {
        TraceStatus::Completed { status, .. } => {
            format!("{} {} returned HTTP {status}", trace.method, trace.url)
        }
        TraceStatus::Failed { reason, .. } => {
            format!("{} {} failed: {reason}", trace.method, trace.url)
        }
        TraceStatus::Pending => format!("{} {} is still pending", trace.method, trace.url),
    }
}
