//! Core types shared across all pagescope crates.
//!
//! Defines the introspection data model (resolved locations, component
//! nodes, network traces, error contexts), the discriminated lookup result,
//! configuration, and the configuration error type.

pub mod component;
pub mod config;
pub mod config_loader;
pub mod correlation;
pub mod error;
pub mod location;
pub mod lookup;
pub mod network;

pub use component::{
    ComponentId, ComponentInstance, ComponentNode, ContextValue, DomRef, Framework, HookInfo,
    HookKind, RenderEnd, RenderEvent, RenderStats,
};
pub use config::{
    ComponentsConfig, CorrelationConfig, NetworkConfig, PagescopeConfig, ResolverConfig,
    SessionConfig, CONFIG_FILENAME,
};
pub use config_loader::{ConfigLoader, ConfigSource, EffectiveConfig};
pub use correlation::{
    CauseCandidate, CauseKind, Confidence, ErrorContext, RootCauseReport, RuntimeError,
    SimilarErrors,
};
pub use error::ConfigError;
pub use location::{ContentSlice, ResolvedLocation, StackFrame, StackTrace, TracedFrame};
pub use lookup::Lookup;
pub use network::{NetworkTrace, TimingBreakdown, TraceStatus, TransportTiming};

/// Milliseconds since the Unix epoch, as reported by the page clock.
pub type Millis = f64;
