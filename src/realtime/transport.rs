//! # Channel Transport
//!
//! Seam between the subscription manager and whatever carries the
//! change feed. A transport opens one multiplexed channel for a set of
//! bindings and reports status transitions and change payloads on a
//! single event stream.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::RealtimeResult;
use super::event::ChangePayload;
use super::subscription::ChannelBinding;

/// Channel lifecycle status as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Join sent, awaiting acknowledgement
    Joining,
    /// Join acknowledged; listeners are active
    Subscribed,
    /// Server or socket reported an error
    ChannelError(String),
    /// Join or heartbeat was not acknowledged in time
    TimedOut,
    /// Channel closed
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Joining => write!(f, "JOINING"),
            ChannelStatus::Subscribed => write!(f, "SUBSCRIBED"),
            ChannelStatus::ChannelError(reason) => write!(f, "CHANNEL_ERROR({})", reason),
            ChannelStatus::TimedOut => write!(f, "TIMED_OUT"),
            ChannelStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Something that happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Change(ChangePayload),
}

/// Sender half used by transports to publish channel events
pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Commands sent from the manager to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Leave the channel and release the connection
    Close,
}

/// Handle to one open channel
///
/// Owned by exclusively one activation. Dropping the handle without
/// calling [`ChannelHandle::close`] also closes the channel, since the
/// transport sees its command stream end.
#[derive(Debug)]
pub struct ChannelHandle {
    name: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    /// Create a handle plus the transport-side ends of its streams
    pub fn pair(
        name: impl Into<String>,
    ) -> (
        ChannelHandle,
        ChannelEventSender,
        mpsc::UnboundedReceiver<ChannelCommand>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = ChannelHandle {
            name: name.into(),
            events: event_rx,
            commands: command_tx,
        };

        (handle, event_tx, command_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event, or `None` once the transport side is gone
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Request close without waiting for confirmation
    pub fn close(self) {
        let _ = self.commands.send(ChannelCommand::Close);
    }
}

/// A change-feed transport
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Open a channel named `name` with one listener per binding
    ///
    /// Returning `Ok` means the join is under way; its outcome arrives
    /// as a status event on the handle.
    async fn open(&self, name: &str, bindings: &[ChannelBinding]) -> RealtimeResult<ChannelHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_pair_delivers_events() {
        let (mut handle, events, _commands) = ChannelHandle::pair("chan");
        events
            .send(ChannelEvent::Status(ChannelStatus::Subscribed))
            .unwrap();

        assert_eq!(handle.name(), "chan");
        assert_eq!(
            handle.recv().await,
            Some(ChannelEvent::Status(ChannelStatus::Subscribed))
        );

        drop(events);
        assert_eq!(handle.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_sends_command() {
        let (handle, _events, mut commands) = ChannelHandle::pair("chan");
        handle.close();
        assert_eq!(commands.recv().await, Some(ChannelCommand::Close));
        assert_eq!(commands.recv().await, None);
    }
}
