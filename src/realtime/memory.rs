//! # In-Memory Transport
//!
//! Transport that keeps channels inside the process. Each opened channel
//! is handed out as a [`MemoryChannel`] controller that can push status
//! transitions and change payloads and observe close requests. Used by
//! tests and local tooling.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangePayload;
use super::subscription::ChannelBinding;
use super::transport::{
    ChannelCommand, ChannelEvent, ChannelEventSender, ChannelHandle, ChannelStatus,
    ChannelTransport,
};

/// Server side of one in-memory channel
#[derive(Debug)]
pub struct MemoryChannel {
    name: String,
    bindings: Vec<ChannelBinding>,
    events: ChannelEventSender,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
}

impl MemoryChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &[ChannelBinding] {
        &self.bindings
    }

    /// Report a status transition; returns false once the handle is gone
    pub fn status(&self, status: ChannelStatus) -> bool {
        self.events.send(ChannelEvent::Status(status)).is_ok()
    }

    /// Deliver a change payload; returns false once the handle is gone
    pub fn change(&self, payload: ChangePayload) -> bool {
        self.events.send(ChannelEvent::Change(payload)).is_ok()
    }

    /// Wait until the owning activation closes or drops the channel
    pub async fn closed(&mut self) {
        while let Some(command) = self.commands.recv().await {
            if command == ChannelCommand::Close {
                return;
            }
        }
    }

    /// Whether a close was requested or the handle dropped
    pub fn is_closed(&mut self) -> bool {
        match self.commands.try_recv() {
            Ok(ChannelCommand::Close) => true,
            Err(mpsc::error::TryRecvError::Disconnected) => true,
            Err(mpsc::error::TryRecvError::Empty) => false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    opened: Vec<String>,
    fail_next: usize,
}

/// In-process channel transport
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    channels: mpsc::UnboundedSender<MemoryChannel>,
}

impl MemoryTransport {
    /// Create a transport and the receiver of its opened channels
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            state: Mutex::new(MemoryState::default()),
            channels: tx,
        });
        (transport, rx)
    }

    /// Names of every channel opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.opened.clone())
            .unwrap_or_default()
    }

    /// Make the next `count` open calls fail
    pub fn fail_next_opens(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = count;
        }
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, name: &str, bindings: &[ChannelBinding]) -> RealtimeResult<ChannelHandle> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| RealtimeError::Internal("Lock poisoned".into()))?;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(RealtimeError::ConnectionError("connection refused".into()));
            }
            state.opened.push(name.to_string());
        }

        let (handle, events, commands) = ChannelHandle::pair(name);
        let _ = events.send(ChannelEvent::Status(ChannelStatus::Joining));

        let channel = MemoryChannel {
            name: name.to_string(),
            bindings: bindings.to_vec(),
            events,
            commands,
        };

        self.channels
            .send(channel)
            .map_err(|_| RealtimeError::ConnectionError("memory transport shut down".into()))?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::event::EventFilter;
    use serde_json::json;

    fn binding() -> ChannelBinding {
        ChannelBinding {
            event: EventFilter::All,
            schema: "public".into(),
            table: "workouts".into(),
            filter: None,
        }
    }

    #[tokio::test]
    async fn test_open_records_name_and_hands_out_channel() {
        let (transport, mut channels) = MemoryTransport::new();
        let mut handle = transport.open("c1", &[binding()]).await.unwrap();

        let channel = channels.recv().await.unwrap();
        assert_eq!(channel.name(), "c1");
        assert_eq!(channel.bindings().len(), 1);
        assert_eq!(transport.opened(), vec!["c1".to_string()]);

        assert_eq!(
            handle.recv().await,
            Some(ChannelEvent::Status(ChannelStatus::Joining))
        );

        channel.change(ChangePayload::insert("workouts", json!({"id": 1})));
        assert!(matches!(handle.recv().await, Some(ChannelEvent::Change(_))));
    }

    #[tokio::test]
    async fn test_fail_next_opens() {
        let (transport, _channels) = MemoryTransport::new();
        transport.fail_next_opens(1);

        assert!(transport.open("c1", &[]).await.is_err());
        assert!(transport.open("c2", &[]).await.is_ok());
        assert_eq!(transport.opened(), vec!["c2".to_string()]);
    }

    #[tokio::test]
    async fn test_close_is_observed() {
        let (transport, mut channels) = MemoryTransport::new();
        let handle = transport.open("c1", &[]).await.unwrap();
        let mut channel = channels.recv().await.unwrap();

        assert!(!channel.is_closed());
        handle.close();
        channel.closed().await;
    }
}
