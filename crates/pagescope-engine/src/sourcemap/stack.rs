//! Stack trace text parsing.

use std::sync::OnceLock;

use regex::Regex;

use pagescope_types::StackFrame;

/// `at fn (url:line:col)` and `at url:line:col` (V8).
fn v8_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^at\s+(?:(?P<func>.+?)\s+\()?(?P<url>[^()\s]+?):(?P<line>\d+):(?P<col>\d+)\)?$",
        )
        .expect("valid V8 frame regex")
    })
}

/// `fn@url:line:col` (SpiderMonkey, JavaScriptCore).
fn gecko_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<func>[^@\s]*)@(?P<url>.+?):(?P<line>\d+):(?P<col>\d+)$")
            .expect("valid gecko frame regex")
    })
}

/// Parse one stack line into a frame.
pub fn parse_frame(line: &str) -> Option<StackFrame> {
    let line = line.trim();
    let caps = v8_frame()
        .captures(line)
        .or_else(|| gecko_frame().captures(line))?;
    let function = caps
        .name("func")
        .map(|m| m.as_str().trim_start_matches("async ").to_string())
        .filter(|f| !f.is_empty());
    Some(StackFrame {
        function,
        url: caps["url"].to_string(),
        line: caps["line"].parse().ok()?,
        column: caps["col"].parse().ok()?,
    })
}

/// Split stack text into frame lines, dropping the leading message.
///
/// Lines that look like frames but do not parse (`at <anonymous>`,
/// `at async Promise.all (index 0)`) are kept with no frame.
pub fn split_frames(text: &str) -> Vec<(String, Option<StackFrame>)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_frame(line) {
            Some(frame) => Some((line.to_string(), Some(frame))),
            None if line.starts_with("at ") => Some((line.to_string(), None)),
            None => None,
        })
        .collect()
}
