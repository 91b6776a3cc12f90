//! The bridge/event-sync core.
//!
//! Two independent execution contexts -- the host process and the page
//! context -- communicate only through named bindings and a page-side event
//! queue. This crate owns everything on that boundary:
//!
//! - **`page`**: the narrow [`PageContext`] capability the bridge requires
//!   from a page driver, and nothing more.
//! - **`preload`**: the page-side runtime injected before any application
//!   script runs, so early events queue instead of firing into a void.
//! - **`binding`**: idempotent exposure of host callables into the page,
//!   tolerant of reloads, races, and partially-failed prior attempts.
//! - **`attach`**: the store-listener wiring table and its detach-first,
//!   one-shot attachment protocol.
//! - **`message`**: the typed message taxonomy crossing the boundary,
//!   replacing stringly-typed dispatch.
//! - **`normalize`**: dedup, throttle and circuit-breaker state machines.
//! - **`dispatch`**: fan-in from bridge messages to the public event stream.
//! - **`recovery`**: the periodic self-check that repairs broken wiring
//!   without a session restart.
//!
//! The crate depends only on `weft-types` and the [`PageContext`] trait it
//! defines itself, so the whole subsystem is testable against an in-memory
//! fake page.

pub mod attach;
pub mod binding;
pub mod dispatch;
pub mod message;
pub mod normalize;
pub mod page;
pub mod preload;
pub mod recovery;

#[cfg(any(test, feature = "testkit"))]
pub mod testing;

pub use attach::{notify_kind, GroupEventKind, ListenerSet, CALLBACK_NAMES, LISTENER_PLAN};
pub use binding::BindingRegistry;
pub use dispatch::{BridgeDispatcher, ControlSignal};
pub use message::{BridgeError, BridgeMessage};
pub use normalize::{CircuitBreaker, Deduper, Throttle};
pub use page::{wait_for_function, BindingCall, Navigation, PageContext, PageError};
pub use preload::Preloader;
pub use recovery::{BridgeCheck, RecoveryHooks, RecoverySupervisor, TickReport};
