//! Hook classification by runtime shape.
//!
//! The agent reports each hook entry with the raw facts it observed (a
//! setter on the queue, an effect record, a dependency list). Deciding what
//! kind of hook that makes happens here and nowhere else.

use serde::Deserialize;
use serde_json::Value;

use pagescope_types::{HookInfo, HookKind};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawHook {
    pub index: usize,
    pub has_dispatch: bool,
    pub effect: bool,
    pub deps: Option<Vec<Value>>,
    pub value: Value,
}

pub fn classify(raw: RawHook) -> HookInfo {
    let kind = if raw.has_dispatch {
        HookKind::State { value: raw.value }
    } else if raw.effect || raw.deps.is_some() {
        HookKind::Effect {
            value: raw.value,
            deps: raw.deps.unwrap_or_default(),
        }
    } else {
        HookKind::Unknown { raw: raw.value }
    };
    HookInfo {
        index: raw.index,
        kind,
    }
}

/// Classify in call order. Entries are sorted by index in case the page
/// reported them out of order.
pub fn classify_all(raw: Vec<RawHook>) -> Vec<HookInfo> {
    let mut hooks: Vec<HookInfo> = raw.into_iter().map(classify).collect();
    hooks.sort_by_key(|h| h.index);
    hooks
}
