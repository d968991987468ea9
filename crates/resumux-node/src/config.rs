//! Command-line session settings.

use std::time::Duration;

use clap::{Args, ValueEnum};
use resumux_core::{InteractionModel, KeepaliveConfig, LeaseConfig, ResumeConfig, Role, SessionConfig};

/// Session settings shared by `serve` and `request`.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Enable leasing
    #[arg(long, global = true)]
    pub lease: bool,

    /// Requests granted per lease
    #[arg(long, global = true, default_value_t = 5)]
    pub lease_count: u32,

    /// Lease time-to-live in milliseconds
    #[arg(long, global = true, default_value_t = 70_000)]
    pub lease_ttl_ms: u64,

    /// Disable session resumption
    #[arg(long, global = true)]
    pub no_resume: bool,

    /// How long a disconnected session is retained, in milliseconds
    #[arg(long, global = true, default_value_t = 30_000)]
    pub resume_window_ms: u64,

    /// Delay between reconnection attempts, in milliseconds
    #[arg(long, global = true, default_value_t = 5_000)]
    pub retry_interval_ms: u64,

    /// Unacknowledged frames retained for replay
    #[arg(long, global = true, default_value_t = 1024)]
    pub buffer_capacity: usize,

    /// Keepalive interval in milliseconds
    #[arg(long, global = true, default_value_t = 20_000)]
    pub keepalive_ms: u64,

    /// Peer silence tolerated before the transport is dropped, in milliseconds
    #[arg(long, global = true, default_value_t = 60_000)]
    pub max_lifetime_ms: u64,
}

impl SessionArgs {
    /// Session configuration for `role`.
    pub fn session_config(&self, role: Role) -> SessionConfig {
        let lease = self.lease.then(|| LeaseConfig {
            count: self.lease_count,
            time_to_live: Duration::from_millis(self.lease_ttl_ms),
            ..LeaseConfig::default()
        });
        SessionConfig {
            role,
            lease,
            resume: ResumeConfig {
                enabled: !self.no_resume,
                window: Duration::from_millis(self.resume_window_ms),
                retry_interval: Duration::from_millis(self.retry_interval_ms),
                buffer_capacity: self.buffer_capacity,
            },
            keepalive: KeepaliveConfig {
                interval: Duration::from_millis(self.keepalive_ms),
                max_lifetime: Duration::from_millis(self.max_lifetime_ms),
            },
            ..SessionConfig::default()
        }
    }
}

/// Interaction model named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    /// Request-response
    Rr,
    /// Fire-and-forget
    Fnf,
    /// Request-stream
    Stream,
    /// Request-channel
    Channel,
}

impl From<ModelArg> for InteractionModel {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Rr => Self::RequestResponse,
            ModelArg::Fnf => Self::FireAndForget,
            ModelArg::Stream => Self::RequestStream,
            ModelArg::Channel => Self::RequestChannel,
        }
    }
}
