//! Network activity tracer.
//!
//! Dispatch events create pending traces. Completion and failure events
//! carry no request id, so they are attributed to a pending trace with the
//! same method and URL: among those dispatched no later than the
//! completion, the one dispatched closest to the completion's implied start
//! (`timestamp - durationMs`). Concurrent identical requests can be
//! misattributed; when more than one candidate existed the trace records a
//! correlation note instead of hiding the ambiguity.
//!
//! Delivery may be duplicated or reordered. Duplicates are merged by key and
//! completions that beat their dispatch are parked until it arrives.

pub mod timing;

use std::collections::{BTreeMap, VecDeque};

use glob::Pattern;
use parking_lot::Mutex;
use uuid::Uuid;

use pagescope_types::{Lookup, Millis, NetworkTrace, TimingBreakdown, TraceStatus, TransportTiming};

use crate::protocol::{CompletionEvent, DispatchEvent, FailureEvent};

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response {
        status: u16,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        timing: Option<TransportTiming>,
    },
    Failure {
        reason: String,
    },
}

/// The end of a request, before it is matched to a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub url: String,
    pub method: String,
    pub timestamp: Millis,
    pub duration_ms: Option<f64>,
    pub outcome: Outcome,
}

impl Completion {
    fn key(&self) -> String {
        let end = match &self.outcome {
            Outcome::Response { status, .. } => status.to_string(),
            Outcome::Failure { reason } => reason.clone(),
        };
        format!("{} {} {} {}", self.method, self.url, self.timestamp, end)
    }

    fn implied_start(&self) -> Option<Millis> {
        self.duration_ms.map(|d| self.timestamp - d)
    }
}

impl From<CompletionEvent> for Completion {
    fn from(event: CompletionEvent) -> Self {
        Self {
            url: event.url,
            method: event.method.to_ascii_uppercase(),
            timestamp: event.timestamp,
            duration_ms: Some(event.duration_ms),
            outcome: Outcome::Response {
                status: event.status,
                headers: event.headers,
                body: event.body,
                timing: event.timing,
            },
        }
    }
}

impl From<FailureEvent> for Completion {
    fn from(event: FailureEvent) -> Self {
        Self {
            url: event.url,
            method: event.method.to_ascii_uppercase(),
            timestamp: event.timestamp,
            duration_ms: event.duration_ms,
            outcome: Outcome::Failure {
                reason: event.reason,
            },
        }
    }
}

/// What happened to an ingested event.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// A new pending trace, with its id.
    Dispatched(String),
    /// A trace moved out of pending.
    Matched { trace_id: String, ambiguous: bool },
    /// A completion with no dispatch yet; held until one arrives.
    Parked,
    Duplicate,
}

struct Slot {
    dispatch_key: String,
    completion_key: Option<String>,
    trace: NetworkTrace,
}

struct Orphan {
    key: String,
    completion: Completion,
}

#[derive(Default)]
struct TracerState {
    slots: VecDeque<Slot>,
    orphans: VecDeque<Orphan>,
}

pub struct NetworkTracer {
    max_traces: usize,
    state: Mutex<TracerState>,
}

impl NetworkTracer {
    pub fn new(max_traces: usize) -> Self {
        Self {
            max_traces: max_traces.max(1),
            state: Mutex::new(TracerState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_dispatch(&self, event: DispatchEvent) -> Ingest {
        let method = event.method.to_ascii_uppercase();
        let dispatch_key = format!("{method} {} {}", event.url, event.timestamp);
        let mut state = self.state.lock();

        if state
            .slots
            .iter()
            .any(|s| s.dispatch_key == dispatch_key || s.trace.request_id.as_deref() == Some(&event.request_id))
        {
            tracing::debug!(request_id = %event.request_id, "duplicate dispatch");
            return Ingest::Duplicate;
        }

        let id = Uuid::new_v4().to_string();
        let mut slot = Slot {
            dispatch_key,
            completion_key: None,
            trace: NetworkTrace {
                id: id.clone(),
                request_id: Some(event.request_id),
                url: event.url,
                method,
                dispatched_at: event.timestamp,
                stack: event.stack,
                status: TraceStatus::Pending,
                duration_ms: None,
                request_headers: event.headers,
                response_headers: BTreeMap::new(),
                request_body: event.body,
                response_body: None,
                timing: None,
                correlation_note: None,
            },
        };

        if let Some(pos) = best_orphan(&state.orphans, &slot.trace) {
            if let Some(orphan) = state.orphans.remove(pos) {
                tracing::debug!(trace_id = %id, "matched parked completion");
                slot.completion_key = Some(orphan.key);
                apply(&mut slot.trace, orphan.completion, None);
            }
        }

        state.slots.push_back(slot);
        while state.slots.len() > self.max_traces {
            state.slots.pop_front();
        }
        Ingest::Dispatched(id)
    }

    pub fn record_completion(&self, completion: Completion) -> Ingest {
        let key = completion.key();
        let mut state = self.state.lock();

        if state
            .slots
            .iter()
            .any(|s| s.completion_key.as_deref() == Some(key.as_str()))
            || state.orphans.iter().any(|o| o.key == key)
        {
            return Ingest::Duplicate;
        }

        let candidates: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.trace.is_pending()
                    && s.trace.method == completion.method
                    && s.trace.url == completion.url
                    && s.trace.dispatched_at <= completion.timestamp
            })
            .map(|(i, _)| i)
            .collect();

        let Some(chosen) = pick_dispatch(&state.slots, &candidates, &completion) else {
            tracing::debug!(url = %completion.url, "parking completion without dispatch");
            state.orphans.push_back(Orphan {
                key,
                completion,
            });
            while state.orphans.len() > self.max_traces {
                state.orphans.pop_front();
            }
            return Ingest::Parked;
        };

        let ambiguous = candidates.len() > 1;
        let note = ambiguous.then(|| {
            format!(
                "{} pending {} {} requests when this response arrived; attributed to the dispatch closest to its start",
                candidates.len(),
                completion.method,
                completion.url
            )
        });
        if ambiguous {
            tracing::warn!(url = %completion.url, candidates = candidates.len(), "ambiguous response attribution");
        }

        let slot = &mut state.slots[chosen];
        slot.completion_key = Some(key);
        apply(&mut slot.trace, completion, note);
        Ingest::Matched {
            trace_id: slot.trace.id.clone(),
            ambiguous,
        }
    }

    pub fn get(&self, id: &str) -> Lookup<NetworkTrace> {
        match self.state.lock().slots.iter().find(|s| s.trace.id == id) {
            Some(slot) => Lookup::Found(slot.trace.clone()),
            None => Lookup::not_found(format!("no network trace with id {id}")),
        }
    }

    /// Traces whose URL matches a glob, oldest first; everything without one.
    pub fn get_by_pattern(&self, pattern: Option<&str>) -> Result<Vec<NetworkTrace>, glob::PatternError> {
        let pattern = pattern.map(Pattern::new).transpose()?;
        Ok(self
            .state
            .lock()
            .slots
            .iter()
            .filter(|s| pattern.as_ref().map_or(true, |p| p.matches(&s.trace.url)))
            .map(|s| s.trace.clone())
            .collect())
    }

    /// Traces dispatched within `[from, to]`, oldest first.
    pub fn get_window(&self, from: Millis, to: Millis) -> Vec<NetworkTrace> {
        let mut traces: Vec<_> = self
            .state
            .lock()
            .slots
            .iter()
            .filter(|s| s.trace.dispatched_at >= from && s.trace.dispatched_at <= to)
            .map(|s| s.trace.clone())
            .collect();
        traces.sort_by(|a, b| a.dispatched_at.total_cmp(&b.dispatched_at));
        traces
    }

    pub fn get_timing(&self, id: &str) -> Lookup<TimingBreakdown> {
        self.get(id).map(|trace| timing::breakdown(&trace))
    }
}

/// Index into `slots` of the dispatch a completion belongs to.
fn pick_dispatch(slots: &VecDeque<Slot>, candidates: &[usize], completion: &Completion) -> Option<usize> {
    let dispatched = |i: &usize| slots[*i].trace.dispatched_at;
    match completion.implied_start() {
        Some(start) => candidates.iter().copied().min_by(|a, b| {
            let da = (dispatched(a) - start).abs();
            let db = (dispatched(b) - start).abs();
            // On a tie prefer the most recent dispatch.
            da.total_cmp(&db)
                .then_with(|| dispatched(b).total_cmp(&dispatched(a)))
        }),
        None => candidates
            .iter()
            .copied()
            .max_by(|a, b| dispatched(a).total_cmp(&dispatched(b))),
    }
}

fn best_orphan(orphans: &VecDeque<Orphan>, trace: &NetworkTrace) -> Option<usize> {
    orphans
        .iter()
        .enumerate()
        .filter(|(_, o)| {
            o.completion.method == trace.method
                && o.completion.url == trace.url
                && o.completion.timestamp >= trace.dispatched_at
        })
        .min_by(|(_, a), (_, b)| {
            let gap = |o: &Orphan| {
                o.completion
                    .implied_start()
                    .map_or(f64::MAX, |s| (s - trace.dispatched_at).abs())
            };
            gap(a).total_cmp(&gap(b))
        })
        .map(|(i, _)| i)
}

fn apply(trace: &mut NetworkTrace, completion: Completion, note: Option<String>) {
    trace.duration_ms = completion
        .duration_ms
        .or(Some(completion.timestamp - trace.dispatched_at));
    trace.correlation_note = note;
    trace.status = match completion.outcome {
        Outcome::Response {
            status,
            headers,
            body,
            timing,
        } => {
            trace.response_headers = headers;
            trace.response_body = body;
            trace.timing = timing;
            TraceStatus::Completed {
                status,
                completed_at: completion.timestamp,
            }
        }
        Outcome::Failure { reason } => TraceStatus::Failed {
            reason,
            completed_at: completion.timestamp,
        },
    };
}
