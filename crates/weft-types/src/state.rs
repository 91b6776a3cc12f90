//! Connection and session lifecycle states.
//!
//! [`RemoteState`] mirrors the connection-state values reported by the page's
//! own state store; [`SessionState`] is the host-side lifecycle the client
//! drives a session through. The two are related but distinct: the remote
//! state is observed, the session state is owned.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Connection state reported by the remote page.
///
/// Values arrive as SCREAMING_SNAKE strings from the page's state store.
/// Unrecognized values are preserved in [`RemoteState::Other`] so a page
/// update cannot break deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteState {
    Opening,
    Unlaunched,
    Pairing,
    Connected,
    Timeout,
    Conflict,
    Unpaired,
    UnpairedIdle,
    Proxyblock,
    Tosblock,
    SmbTosblock,
    DeprecatedVersion,
    Other(String),
}

impl RemoteState {
    /// Parse a raw state tag as reported by the page.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "OPENING" => Self::Opening,
            "UNLAUNCHED" => Self::Unlaunched,
            "PAIRING" => Self::Pairing,
            "CONNECTED" => Self::Connected,
            "TIMEOUT" => Self::Timeout,
            "CONFLICT" => Self::Conflict,
            "UNPAIRED" => Self::Unpaired,
            "UNPAIRED_IDLE" => Self::UnpairedIdle,
            "PROXYBLOCK" => Self::Proxyblock,
            "TOS_BLOCK" => Self::Tosblock,
            "SMB_TOS_BLOCK" => Self::SmbTosblock,
            "DEPRECATED_VERSION" => Self::DeprecatedVersion,
            other => Self::Other(other.to_string()),
        }
    }

    /// The raw state tag, as the page spells it.
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Opening => "OPENING",
            Self::Unlaunched => "UNLAUNCHED",
            Self::Pairing => "PAIRING",
            Self::Connected => "CONNECTED",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::Unpaired => "UNPAIRED",
            Self::UnpairedIdle => "UNPAIRED_IDLE",
            Self::Proxyblock => "PROXYBLOCK",
            Self::Tosblock => "TOS_BLOCK",
            Self::SmbTosblock => "SMB_TOS_BLOCK",
            Self::DeprecatedVersion => "DEPRECATED_VERSION",
            Self::Other(tag) => tag,
        }
    }

    /// States that mean the page is still starting up and has not yet decided
    /// whether a login credential is required.
    pub fn is_launching(&self) -> bool {
        matches!(self, Self::Opening | Self::Unlaunched | Self::Pairing)
    }

    /// States that require presenting a fresh login credential (QR or
    /// pairing code).
    pub fn needs_credential(&self) -> bool {
        matches!(self, Self::Unpaired | Self::UnpairedIdle)
    }

    /// States a healthy session may pass through without being considered
    /// disconnected. `CONFLICT` is accepted only when the host has opted into
    /// session takeover.
    pub fn is_accepted(&self, takeover_on_conflict: bool) -> bool {
        match self {
            Self::Connected | Self::Opening | Self::Pairing | Self::Timeout => true,
            Self::Conflict => takeover_on_conflict,
            _ => false,
        }
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl Serialize for RemoteState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for RemoteState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Host-side session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No credential established and none requested yet.
    Unauthenticated,
    /// A QR payload or pairing code is being presented and refreshed.
    CredentialPending,
    /// Credential accepted; waiting for the page to finish its history sync.
    PendingSync,
    /// Synced, stores injected, listeners attached: events flow.
    Ready,
    /// A recoverable anomaly was detected; repair is in progress.
    Degraded,
    /// The remote session ended (conflict, timeout, explicit state).
    Disconnected,
    /// The remote session was explicitly invalidated.
    LoggedOut,
    /// All resources released. Terminal.
    Destroyed,
}

impl SessionState {
    /// Whether the session can move from `self` to `to`.
    ///
    /// `Destroyed` is terminal; `LoggedOut` and `Destroyed` are reachable
    /// from any live state; `Degraded` only ever flips back to `Ready`.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        if self == to {
            return false;
        }
        match (self, to) {
            (Destroyed, _) => false,
            (_, Destroyed) | (_, LoggedOut) | (_, Disconnected) => !self.is_terminal(),
            (Unauthenticated, CredentialPending) | (Unauthenticated, PendingSync) => true,
            (CredentialPending, PendingSync) => true,
            (PendingSync, Ready) => true,
            (Ready, Degraded) | (Degraded, Ready) => true,
            _ => false,
        }
    }

    /// Terminal states emit no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Destroyed)
    }
}

/// Why a session was disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The page reported a state outside the accepted set.
    State(RemoteState),
    /// The remote session was explicitly logged out.
    Logout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => f.write_str(state.as_tag()),
            Self::Logout => f.write_str("LOGOUT"),
        }
    }
}

/// Delivery acknowledgement level of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckCode {
    Error,
    Pending,
    Sent,
    Received,
    Read,
    Played,
}

impl AckCode {
    /// Decode the numeric ack value carried by the message store.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Error),
            0 => Some(Self::Pending),
            1 => Some(Self::Sent),
            2 => Some(Self::Received),
            3 => Some(Self::Read),
            4 => Some(Self::Played),
            _ => None,
        }
    }

    /// The numeric value the message store uses for this level.
    pub fn code(self) -> i32 {
        match self {
            Self::Error => -1,
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Received => 2,
            Self::Read => 3,
            Self::Played => 4,
        }
    }
}
