//! Chrome DevTools Protocol access for pagescope.
//!
//! The crate is split into three layers:
//!
//! - **`cdp`**: WebSocket client with JSON-RPC command/response correlation
//!   and broadcast fan-out of protocol events.
//! - **`driver`**: [`PageDriver`], one page target with the operations the
//!   introspection engine needs (evaluate, init scripts, bindings).
//! - **`page`**: the [`PageContext`] trait the engine is written against, so
//!   the engine can run over a scripted page in tests.
//!
//! Chrome must be running with `--remote-debugging-port`; page targets are
//! listed at `http://localhost:9222/json`.

pub mod cdp;
pub mod driver;
pub mod error;
pub mod page;

pub use cdp::{CdpClient, CdpEvent};
pub use driver::PageDriver;
pub use error::BrowserError;
pub use page::PageContext;
