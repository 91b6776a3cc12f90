//! Chrome DevTools Protocol transport and page driver.
//!
//! Connects to an already-running Chromium (started with
//! `--remote-debugging-port`), attaches to the messenger tab, and implements
//! the bridge's `PageContext` capability over it:
//!
//! - **`cdp`**: the WebSocket JSON-RPC client with command/response
//!   correlation and event forwarding.
//! - **`page`**: the [`Page`] driver -- script evaluation with exception
//!   surfacing, preload script installation, binding management with
//!   duplicate-error classification, navigation watching, and document
//!   interception for version pinning.
//! - **`launch`**: target discovery over the DevTools HTTP endpoint.
//!
//! Typical wiring:
//!
//! ```ignore
//! let ws = launch::discover_page("http://127.0.0.1:9222", &config.web_url).await?;
//! let page = Page::connect(&ws).await?;
//! ```

pub mod cdp;
pub mod error;
pub mod launch;
pub mod page;

pub use cdp::{CdpClient, CdpEvent};
pub use error::BrowserError;
pub use launch::{discover_page, TargetInfo};
pub use page::Page;
