//! Observable events
//!
//! Every log line carries one of these names, so downstream log
//! queries can rely on a closed vocabulary.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Configuration loaded
    ConfigLoaded,
    /// HTTP server listening
    ServerStart,
    /// HTTP server stopped
    ServerStop,

    // Realtime activation
    /// Activation skipped (disabled or nothing to listen to)
    ActivationSkipped,
    /// Channel creation refused because the circuit is open
    CircuitRejected,
    /// Channel opened, join in flight
    ChannelOpened,
    /// Channel join acknowledged
    ChannelSubscribed,
    /// Intermediate channel status (joining, closed)
    ChannelStatus,
    /// Channel reported an error or timed out
    ChannelFailed,
    /// Reconnect scheduled
    ChannelReconnecting,
    /// Circuit opened after repeated failures
    CircuitOpened,
    /// No subscribe within the safety window
    SafetyTimeout,
    /// Channel closed by deactivation or teardown
    ChannelClosed,
    /// Pending deliveries dropped on deactivation
    DeliveriesCancelled,
    /// Frame from the server could not be understood
    FrameRejected,
    /// Delivered change could not be written out
    OutputFailed,

    // Functions
    /// Assistant request answered
    AssistantReply,
    /// Assistant request refused by a limit
    AssistantLimited,
    /// Model call failed
    AssistantUpstreamFailed,
    /// Payment webhook accepted
    WebhookReceived,
    /// Payment webhook ignored (irrelevant event type)
    WebhookIgnored,
    /// Payment webhook failed
    WebhookFailed,
    /// Premium access granted or revoked
    PremiumChanged,
}

impl Event {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ServerStart => "SERVER_START",
            Event::ServerStop => "SERVER_STOP",
            Event::ActivationSkipped => "ACTIVATION_SKIPPED",
            Event::CircuitRejected => "CIRCUIT_REJECTED",
            Event::ChannelOpened => "CHANNEL_OPENED",
            Event::ChannelSubscribed => "CHANNEL_SUBSCRIBED",
            Event::ChannelStatus => "CHANNEL_STATUS",
            Event::ChannelFailed => "CHANNEL_FAILED",
            Event::ChannelReconnecting => "CHANNEL_RECONNECTING",
            Event::CircuitOpened => "CIRCUIT_OPENED",
            Event::SafetyTimeout => "SAFETY_TIMEOUT",
            Event::ChannelClosed => "CHANNEL_CLOSED",
            Event::DeliveriesCancelled => "DELIVERIES_CANCELLED",
            Event::FrameRejected => "FRAME_REJECTED",
            Event::OutputFailed => "OUTPUT_FAILED",
            Event::AssistantReply => "ASSISTANT_REPLY",
            Event::AssistantLimited => "ASSISTANT_LIMITED",
            Event::AssistantUpstreamFailed => "ASSISTANT_UPSTREAM_FAILED",
            Event::WebhookReceived => "WEBHOOK_RECEIVED",
            Event::WebhookIgnored => "WEBHOOK_IGNORED",
            Event::WebhookFailed => "WEBHOOK_FAILED",
            Event::PremiumChanged => "PREMIUM_CHANGED",
        }
    }

    /// Events that indicate degraded service
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::CircuitRejected
                | Event::ChannelFailed
                | Event::CircuitOpened
                | Event::SafetyTimeout
                | Event::FrameRejected
                | Event::OutputFailed
                | Event::AssistantUpstreamFailed
                | Event::WebhookFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        for event in [Event::ChannelOpened, Event::CircuitOpened, Event::WebhookIgnored] {
            assert!(event
                .as_str()
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_warning_classification() {
        assert!(Event::CircuitOpened.is_warning());
        assert!(!Event::ChannelSubscribed.is_warning());
    }
}
