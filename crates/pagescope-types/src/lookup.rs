//! Discriminated result for queries whose target may legitimately be absent.
//!
//! A missing component, selector, or request is an expected outcome, not an
//! error. Queries report it in-band as `found: false` with a message.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Outcome of a lookup against live page state.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The target exists; carries a point-in-time copy.
    Found(T),
    /// The target does not exist.
    NotFound { message: String },
    /// The query could not complete at full fidelity (e.g. the page
    /// navigated twice while it ran).
    Degraded { reason: String },
}

impl<T> Lookup<T> {
    pub fn not_found(message: impl Into<String>) -> Self {
        Lookup::NotFound {
            message: message.into(),
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Lookup::Degraded {
            reason: reason.into(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Borrow the found value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound { message } => Lookup::NotFound { message },
            Lookup::Degraded { reason } => Lookup::Degraded { reason },
        }
    }
}

impl<T: Serialize> Serialize for Lookup<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Lookup::Found(value) => {
                let mut s = serializer.serialize_struct("Lookup", 2)?;
                s.serialize_field("found", &true)?;
                s.serialize_field("value", value)?;
                s.end()
            }
            Lookup::NotFound { message } => {
                let mut s = serializer.serialize_struct("Lookup", 2)?;
                s.serialize_field("found", &false)?;
                s.serialize_field("message", message)?;
                s.end()
            }
            Lookup::Degraded { reason } => {
                let mut s = serializer.serialize_struct("Lookup", 3)?;
                s.serialize_field("found", &false)?;
                s.serialize_field("degraded", &true)?;
                s.serialize_field("message", reason)?;
                s.end()
            }
        }
    }
}
