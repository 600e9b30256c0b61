//! Error message normalization for grouping.

use std::sync::OnceLock;

use regex::Regex;

fn quoted() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'[^']*'|"[^"]*"|`[^`]*`"#).expect("valid quoted-string regex"))
}

fn number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b0[xX][0-9a-fA-F]+|\b\d+(?:\.\d+)?").expect("valid number regex")
    })
}

/// Replace quoted strings with `<str>` and numbers with `<num>`.
///
/// Strings go first so digits inside them do not become `<num>`.
pub fn normalize_message(message: &str) -> String {
    let without_strings = quoted().replace_all(message.trim(), "<str>");
    number().replace_all(&without_strings, "<num>").into_owned()
}
