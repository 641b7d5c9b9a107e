//! # Realtime Subscriptions
//!
//! Client-side manager for database change feeds.
//!
//! ## Architecture
//!
//! - **Subscriptions**: caller-supplied descriptors with stable keys
//! - **Debounce**: keyed delay queue, latest payload wins per key
//! - **Circuit**: per-purpose breaker shared across activations
//! - **Manager**: one worker task per activation, owns the channel
//! - **Transport**: WebSocket client, or an in-memory feed for tests
//!
//! ```ignore
//! let manager = RealtimeManager::new(transport);
//! let set = SubscriptionSet::new(vec![
//!     SubscriptionDescriptor::new("messages", "chat_messages", |p| println!("{:?}", p))
//!         .with_event(EventFilter::Insert),
//! ])?;
//! let activation = manager.activate(RealtimeOptions::for_channel("chat"), set);
//! ```

pub mod circuit;
pub mod debounce;
pub mod errors;
pub mod event;
pub mod manager;
pub mod memory;
pub mod status;
pub mod subscription;
pub mod transport;
pub mod websocket;

pub use circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitRegistry, CircuitState};
pub use debounce::DebounceQueue;
pub use errors::{RealtimeError, RealtimeResult};
pub use event::{ChangeKind, ChangePayload, EventFilter};
pub use manager::{channel_name, Activation, RealtimeManager, RealtimeOptions};
pub use memory::{MemoryChannel, MemoryTransport};
pub use status::{ConnectionStatus, FailureKind};
pub use subscription::{
    ChannelBinding, RowFilter, SubscriptionDescriptor, SubscriptionKey, SubscriptionSet,
};
pub use transport::{ChannelEvent, ChannelHandle, ChannelStatus, ChannelTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};
