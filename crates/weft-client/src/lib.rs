//! Host-facing messenger client.
//!
//! Ties the bridge core to a live page: the session [`Client`] drives
//! navigation, injection and teardown, surfaces the typed event stream, and
//! exposes the RPC-style command surface. Credential persistence is
//! pluggable through [`AuthStrategy`], and the page version can be pinned
//! through a [`VersionCache`].
//!
//! ```ignore
//! let ws = weft_browser::discover_page("http://127.0.0.1:9222", &config.web_url).await?;
//! let page = Arc::new(weft_browser::Page::connect(&ws).await?);
//! let client = Client::new(config, Box::new(NoAuth), page, Box::new(NoopCache));
//! let mut events = client.events().expect("first take");
//! client.initialize().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {event:?}", event.name());
//! }
//! ```

pub mod auth;
pub mod client;
pub mod commands;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod scripts;
pub mod webcache;

pub use auth::{AuthDecision, AuthStrategy, NoAuth};
pub use client::Client;
pub use commands::{MessageSendOptions, SearchOptions};
pub use driver::MessengerPage;
pub use error::ClientError;
pub use lifecycle::{Lifecycle, LifecycleAction};
pub use webcache::{LocalVersionCache, NoopCache, RemoteVersionCache, VersionCache};
