//! # Connection Status
//!
//! Caller-visible connectivity of an activation.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Why a channel attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    /// Server or transport reported a channel error
    ChannelError(String),
    /// Join was not acknowledged in time
    TimedOut,
    /// No subscribe within the activation's safety window
    SafetyTimeout,
    /// Channel could not be opened at all
    Transport(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ChannelError(reason) => write!(f, "channel error: {}", reason),
            FailureKind::TimedOut => write!(f, "timed out"),
            FailureKind::SafetyTimeout => write!(f, "safety timeout"),
            FailureKind::Transport(reason) => write!(f, "transport error: {}", reason),
        }
    }
}

/// Connectivity of one activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not active: disabled, empty, deactivated, or never started
    Disconnected,
    /// Channel is being opened
    Connecting,
    /// Channel subscribed; changes are flowing
    Connected,
    /// Last attempt failed; another follows after `retry_in`
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Too many failures; no channel until `retry_after` has passed
    CircuitOpen { retry_after: Duration },
    /// Gave up on this activation's channel
    Error(FailureKind),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionStatus::Connecting => write!(f, "CONNECTING"),
            ConnectionStatus::Connected => write!(f, "CONNECTED"),
            ConnectionStatus::Reconnecting { attempt, retry_in } => {
                write!(f, "RECONNECTING(attempt={}, in={}ms)", attempt, retry_in.as_millis())
            }
            ConnectionStatus::CircuitOpen { retry_after } => {
                write!(f, "CIRCUIT_OPEN(retry_after={}ms)", retry_after.as_millis())
            }
            ConnectionStatus::Error(kind) => write!(f, "ERROR({})", kind),
        }
    }
}
