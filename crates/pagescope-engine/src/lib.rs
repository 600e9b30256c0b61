//! Live introspection of a running web page.
//!
//! Drives a page through [`pagescope_browser::PageContext`] and answers
//! debugging questions about it:
//!
//! - [`sourcemap`]: maps minified bundle positions and stack traces back to
//!   original source through an LRU cache of parsed source maps
//! - [`components`]: detects React, Vue, and Angular, and snapshots their
//!   component trees, props, state, hooks, context, and render cadence
//! - [`network`]: traces `fetch`/XHR requests with the stack that issued
//!   them and their transport timing
//! - [`correlate`]: joins an error with the stack, components, and requests
//!   around it, and groups recurring errors
//! - [`manifest`]: module size and dependency queries over a build manifest
//!
//! [`Introspector`] ties these together for one page. Page-side work is done
//! by an agent script (`js/agent.js`) installed once per document; it
//! reports back through a CDP binding (see [`protocol`]).

pub mod agent;
pub mod components;
pub mod correlate;
pub mod error;
pub mod injector;
pub mod introspector;
pub mod manifest;
pub mod network;
pub mod protocol;
pub mod sourcemap;

pub use components::{ComponentTracker, ComponentTree};
pub use correlate::{ComponentSource, ErrorCorrelator, ErrorLog};
pub use error::IntrospectError;
pub use injector::{ImmediateInstall, InstallReport, InstrumentationRegistry};
pub use introspector::Introspector;
pub use manifest::{BuildManifest, ModuleInfo};
pub use network::NetworkTracer;
pub use sourcemap::SourceLocationResolver;
