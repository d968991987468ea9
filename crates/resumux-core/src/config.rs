//! Session configuration.
//!
//! These are the only knobs the protocol core consumes. Durations
//! (de)serialize as integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which end of the connection a session is.
///
/// The client sends SETUP, allocates odd stream ids and drives reconnection.
/// The server accepts SETUP, allocates even stream ids and waits for RESUME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connection initiator
    Client,
    /// Connection acceptor
    Server,
}

/// Lease issuance policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Requests granted per lease
    pub count: u32,
    /// Lease validity window
    #[serde(with = "millis")]
    pub time_to_live: Duration,
    /// Re-issue when this little time is left on the issued lease
    #[serde(with = "millis")]
    pub reissue_margin: Duration,
    /// Re-issue when this few requests are left on the issued lease
    pub reissue_below: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            count: 5,
            time_to_live: Duration::from_millis(70_000),
            reissue_margin: Duration::from_secs(1),
            reissue_below: 1,
        }
    }
}

/// Resumption policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Whether sessions survive transport loss
    pub enabled: bool,
    /// How long after a disconnect the session may still be resumed
    #[serde(with = "millis")]
    pub window: Duration,
    /// Fixed interval between reconnection attempts
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    /// Maximum number of unacknowledged frames retained for replay
    pub buffer_capacity: usize,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            buffer_capacity: 1024,
        }
    }
}

/// Keepalive timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Interval between KEEPALIVE frames (client side)
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Silence after which the transport is considered lost
    #[serde(with = "millis")]
    pub max_lifetime: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(20), max_lifetime: Duration::from_secs(60) }
    }
}

/// Everything a session needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Client or server
    pub role: Role,
    /// Lease policy; `None` disables leasing (clients only, servers follow
    /// the SETUP flag and fall back to [`LeaseConfig::default`])
    pub lease: Option<LeaseConfig>,
    /// Resume policy
    pub resume: ResumeConfig,
    /// Keepalive timing (servers adopt the client's values from SETUP)
    pub keepalive: KeepaliveConfig,
    /// MIME type of payload data, announced in SETUP
    pub data_mime: String,
    /// MIME type of payload metadata, announced in SETUP
    pub metadata_mime: String,
}

impl SessionConfig {
    /// Default client configuration.
    pub fn client() -> Self {
        Self::default()
    }

    /// Default server configuration.
    pub fn server() -> Self {
        Self { role: Role::Server, ..Self::default() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            lease: None,
            resume: ResumeConfig::default(),
            keepalive: KeepaliveConfig::default(),
            data_mime: "application/octet-stream".to_string(),
            metadata_mime: "text/plain".to_string(),
        }
    }
}

/// Saturating conversion to the u32 milliseconds used on the wire.
pub(crate) fn duration_to_wire_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_policy() {
        let lease = LeaseConfig::default();
        assert_eq!(lease.count, 5);
        assert_eq!(lease.time_to_live, Duration::from_millis(70_000));

        let resume = ResumeConfig::default();
        assert_eq!(resume.retry_interval, Duration::from_secs(5));
        assert_eq!(resume.window, Duration::from_secs(30));
    }

    #[test]
    fn wire_millis_saturate() {
        assert_eq!(duration_to_wire_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_to_wire_millis(Duration::from_secs(u64::MAX / 1000)), u32::MAX);
    }
}
