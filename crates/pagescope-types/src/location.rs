//! Source locations, stack frames, and resolved stack traces.

use serde::{Deserialize, Serialize};

/// An original-source location produced from minified coordinates.
///
/// Lines and columns are 1-based. When resolution fails, `resolved` is
/// false, `file` is the bundle URL and the coordinates are the minified ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Original symbol name from the map's `names` table.
    pub name: Option<String>,
    /// The original source line at `line`, when the map embeds sources.
    pub source_line: Option<String>,
    pub resolved: bool,
    /// Why the location is degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ResolvedLocation {
    /// A degraded location that preserves the minified coordinates.
    pub fn degraded(bundle: &str, line: u32, column: u32, note: impl Into<String>) -> Self {
        Self {
            file: bundle.to_string(),
            line,
            column,
            name: None,
            source_line: None,
            resolved: false,
            note: Some(note.into()),
        }
    }
}

/// One frame of a call stack, in generated (minified) coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function: Option<String>,
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// A stack frame paired with its resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedFrame {
    /// The raw text of the frame line.
    pub raw: String,
    /// The parsed frame, if the line matched a known frame shape.
    pub frame: Option<StackFrame>,
    /// The resolved location, present only when resolution succeeded.
    pub location: Option<ResolvedLocation>,
}

impl TracedFrame {
    pub fn is_resolved(&self) -> bool {
        self.location.as_ref().is_some_and(|l| l.resolved)
    }
}

/// A stack trace with each frame resolved independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    pub frames: Vec<TracedFrame>,
    pub resolved_count: usize,
    pub unresolved_count: usize,
}

impl StackTrace {
    pub fn from_frames(frames: Vec<TracedFrame>) -> Self {
        let resolved_count = frames.iter().filter(|f| f.is_resolved()).count();
        let unresolved_count = frames.len() - resolved_count;
        Self {
            frames,
            resolved_count,
            unresolved_count,
        }
    }

    /// True when at least one frame mapped back to original source.
    pub fn has_resolved_frames(&self) -> bool {
        self.resolved_count > 0
    }
}

/// A slice of embedded original source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ContentSlice {
    #[serde(rename_all = "camelCase")]
    Available {
        file: String,
        start_line: u32,
        lines: Vec<String>,
    },
    Unavailable { file: String, reason: String },
}

impl ContentSlice {
    pub fn is_available(&self) -> bool {
        matches!(self, ContentSlice::Available { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(resolved: bool) -> TracedFrame {
        TracedFrame {
            raw: "at f (app.js:1:1)".into(),
            frame: None,
            location: Some(ResolvedLocation {
                resolved,
                ..ResolvedLocation::degraded("app.js", 1, 1, "x")
            }),
        }
    }

    #[test]
    fn test_stack_trace_counts() {
        let trace = StackTrace::from_frames(vec![frame(true), frame(false), frame(true)]);
        assert_eq!(trace.resolved_count, 2);
        assert_eq!(trace.unresolved_count, 1);
        assert!(trace.has_resolved_frames());
    }

    #[test]
    fn test_degraded_location_keeps_coordinates() {
        let loc = ResolvedLocation::degraded("https://cdn/app.min.js", 1, 5021, "no source map");
        assert!(!loc.resolved);
        assert_eq!(loc.file, "https://cdn/app.min.js");
        assert_eq!((loc.line, loc.column), (1, 5021));
    }

    #[test]
    fn test_content_slice_tagging() {
        let slice = ContentSlice::Unavailable {
            file: "src/App.tsx".into(),
            reason: "no embedded sources".into(),
        };
        let json = serde_json::to_value(&slice).unwrap();
        assert_eq!(json["status"], "unavailable");
    }
}
