//! Client and bridge configuration.
//!
//! [`ClientConfig`] is the top-level knob set for one session; the nested
//! [`BridgeTuning`] holds the dedup/throttle/breaker parameters of the event
//! pipeline. Defaults mirror the web client's observed behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The web client URL a session navigates to.
pub const DEFAULT_WEB_URL: &str = "https://web.whatsapp.com/";

/// Referer sent with the initial navigation.
pub const DEFAULT_REFERER: &str = "https://whatsapp.com/";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Minimum allowed recovery period (1 minute). The supervisor is a coarse
/// self-check, not a poll loop.
const MIN_RECOVERY_SECS: u64 = 60;

/// Maximum allowed recovery period (24 hours). Prevents misconfiguration.
const MAX_RECOVERY_SECS: u64 = 86_400;

/// Tuning for the event normalizer, throttler and circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTuning {
    /// Minimum interval between emissions of the same throttled key.
    #[serde(with = "duration_millis")]
    pub throttle_interval: Duration,
    /// How long a dedup/throttle entry lives without being touched.
    #[serde(with = "duration_secs")]
    pub dedup_window: Duration,
    /// How often stale dedup/throttle/breaker entries are swept.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Consecutive failures within the window that trip the breaker.
    pub breaker_threshold: u32,
    /// Window within which failures count toward the threshold.
    #[serde(with = "duration_secs")]
    pub breaker_window: Duration,
    /// Failure counts are halved once per decay period, not cleared at once.
    #[serde(with = "duration_secs")]
    pub breaker_decay: Duration,
}

impl Default for BridgeTuning {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(50),
            dedup_window: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(300),
            breaker_threshold: 5,
            breaker_window: Duration::from_secs(60),
            breaker_decay: Duration::from_secs(120),
        }
    }
}

/// Top-level configuration for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identifies this session in logs and page-side console output.
    pub client_id: String,
    /// URL of the web client.
    pub web_url: String,
    /// Referer for the initial navigation.
    pub referer: String,
    /// User agent override for the page.
    pub user_agent: String,
    /// How long to wait for the page's core globals before failing injection.
    #[serde(with = "duration_secs")]
    pub auth_timeout: Duration,
    /// How many credential refreshes to allow before giving up.
    /// `0` means no limit.
    pub qr_max_retries: u32,
    /// Resolve a session conflict by taking over instead of disconnecting.
    pub takeover_on_conflict: bool,
    /// How long to wait before issuing the takeover command.
    #[serde(with = "duration_secs")]
    pub takeover_delay: Duration,
    /// Event pipeline tuning.
    #[serde(default)]
    pub bridge: BridgeTuning,
    /// Period of the recovery supervisor's self-check.
    #[serde(with = "duration_secs")]
    pub recovery_period: Duration,
    /// Consecutive failed repair rounds before the session reports degraded.
    pub recovery_failure_budget: u32,
    /// Pin the web client to a specific version via the version cache.
    pub web_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "default".to_string(),
            web_url: DEFAULT_WEB_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth_timeout: Duration::from_secs(45),
            qr_max_retries: 0,
            takeover_on_conflict: false,
            takeover_delay: Duration::from_secs(0),
            bridge: BridgeTuning::default(),
            recovery_period: Duration::from_secs(600),
            recovery_failure_budget: 3,
            web_version: None,
        }
    }
}

impl ClientConfig {
    /// Validate the recovery period against the allowed range.
    pub fn validate(&self) -> Result<(), String> {
        let secs = self.recovery_period.as_secs();
        if secs < MIN_RECOVERY_SECS {
            return Err(format!(
                "recovery period too short: {secs}s < {MIN_RECOVERY_SECS}s minimum"
            ));
        }
        if secs > MAX_RECOVERY_SECS {
            return Err(format!(
                "recovery period too long: {secs}s > {MAX_RECOVERY_SECS}s maximum"
            ));
        }
        Ok(())
    }
}

/// Serde helper for serializing Duration as seconds (u64).
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for serializing Duration as milliseconds (u64).
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
