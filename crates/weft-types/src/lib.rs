//! Core types shared across all weft crates.
//!
//! Defines the public event taxonomy, the payload models mirrored from the
//! remote page's stores, connection/session state enums, and configuration.

pub mod config;
pub mod event;
pub mod model;
pub mod state;

pub use config::{BridgeTuning, ClientConfig, DEFAULT_REFERER, DEFAULT_WEB_URL};
pub use event::Event;
pub use model::{
    CallData, ChatData, ClientInfo, ContactData, EntityId, GroupNotification, MessageData,
    MessageId, PollVote, PollVoteData, Reaction, SelectedPollOption,
};
pub use state::{AckCode, DisconnectReason, RemoteState, SessionState};
