//! # Realtime Subscription Manager
//!
//! Multiplexes a caller's subscriptions onto one physical channel per
//! activation, debounces bursts per subscription key and stops reconnect
//! storms with a circuit breaker shared per channel purpose.
//!
//! ## Model
//!
//! Each activation is one Tokio task that exclusively owns its channel
//! handle and debounce queue. The task waits on, in priority order:
//! shutdown, the safety timer, the next debounce deadline, a pending
//! channel open, the channel's event stream, and a scheduled reconnect.
//! Nothing is shared with other activations except the breaker for the
//! same `channel_hint`.
//!
//! The safety timer is armed each time a channel open starts and is
//! disarmed by `Subscribed`, by a failure, or by teardown. It bounds every
//! attempt, including reconnects after an earlier success.
//!
//! ## Failure policy
//!
//! Failures never reach the caller as errors. They show up as
//! [`ConnectionStatus`] transitions and log lines.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::circuit::{lock, Admission, CircuitConfig, CircuitRegistry, FailureOutcome, SharedBreaker};
use super::debounce::DebounceQueue;
use super::errors::RealtimeResult;
use super::event::ChangePayload;
use super::status::{ConnectionStatus, FailureKind};
use super::subscription::{ChannelBinding, SubscriptionSet};
use super::transport::{ChannelEvent, ChannelHandle, ChannelStatus, ChannelTransport};
use crate::observability::{log_event_with_fields, trace_event, Event, MetricsRegistry};

/// Per-activation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeOptions {
    /// When false, activation does nothing
    pub enabled: bool,

    /// Channel purpose; prefix of channel names and circuit registry key
    pub channel_hint: String,

    /// Quiet window per subscription key
    pub debounce: Duration,

    /// Consecutive failures before the circuit opens
    pub max_retries: u32,

    /// Base reconnect delay; cooldown is `retry_delay * 2^max_retries`
    pub retry_delay: Duration,

    /// Give up if a channel is not subscribed this long after its open starts
    pub safety_timeout: Duration,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_hint: "realtime".to_string(),
            debounce: Duration::from_millis(500),
            max_retries: 3,
            retry_delay: Duration::from_millis(8000),
            safety_timeout: Duration::from_secs(20),
        }
    }
}

impl RealtimeOptions {
    /// Defaults with the given channel purpose
    pub fn for_channel(hint: impl Into<String>) -> Self {
        Self {
            channel_hint: hint.into(),
            ..Default::default()
        }
    }

    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}

/// Globally unique channel name: `hint-<unix millis>-<random suffix>`
pub fn channel_name(hint: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", hint, Utc::now().timestamp_millis(), suffix)
}

/// Creates activations over one transport
#[derive(Clone)]
pub struct RealtimeManager {
    transport: Arc<dyn ChannelTransport>,
    circuits: Arc<CircuitRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl RealtimeManager {
    /// Manager using the process-wide circuit registry and metrics
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            circuits: CircuitRegistry::global(),
            metrics: MetricsRegistry::global(),
        }
    }

    /// Use a dedicated circuit registry
    pub fn with_circuits(mut self, circuits: Arc<CircuitRegistry>) -> Self {
        self.circuits = circuits;
        self
    }

    /// Use a dedicated metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    /// Start an activation
    ///
    /// Never fails. A disabled or empty activation, or one refused by an
    /// open circuit, is inert and reports its reason through
    /// [`Activation::status`]. Must be called within a Tokio runtime.
    pub fn activate(&self, options: RealtimeOptions, subscriptions: SubscriptionSet) -> Activation {
        let hint = options.channel_hint.clone();

        if !options.enabled || subscriptions.is_empty() {
            let reason = if options.enabled { "no subscriptions" } else { "disabled" };
            log_event_with_fields(
                Event::ActivationSkipped,
                &[("hint", hint.as_str()), ("reason", reason)],
            );
            return Activation::inert(ConnectionStatus::Disconnected);
        }

        let breaker = self.circuits.breaker(&hint, options.circuit_config());
        let admission = lock(&breaker).admit(Instant::now());
        if let Admission::Rejected { retry_after } = admission {
            self.metrics.increment_circuit_rejections();
            log_event_with_fields(
                Event::CircuitRejected,
                &[
                    ("hint", hint.as_str()),
                    ("retry_after_ms", retry_after.as_millis().to_string().as_str()),
                ],
            );
            return Activation::inert(ConnectionStatus::CircuitOpen { retry_after });
        }

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            bindings: subscriptions.bindings(),
            queue: DebounceQueue::new(options.debounce),
            subscriptions,
            options,
            breaker,
            metrics: Arc::clone(&self.metrics),
            status: status_tx,
            cancelled: Arc::clone(&cancelled),
            channel: None,
            opening: None,
            reconnect_at: None,
            safety_deadline: None,
        };

        let task = tokio::spawn(worker.run(shutdown_rx));

        Activation {
            status: status_rx,
            cancelled,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// A running (or inert) activation
///
/// Dropping it deactivates: pending deliveries are cancelled and the
/// channel is closed. Circuit state is kept.
#[derive(Debug)]
pub struct Activation {
    status: watch::Receiver<ConnectionStatus>,
    cancelled: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Activation {
    fn inert(status: ConnectionStatus) -> Self {
        let (_, rx) = watch::channel(status);
        Self {
            status: rx,
            cancelled: Arc::new(AtomicBool::new(true)),
            shutdown: None,
            task: None,
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Whether the channel is subscribed
    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    /// Receiver of status transitions
    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Whether a task backs this activation
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Deactivate without waiting for the task to finish
    pub fn deactivate(self) {
        drop(self);
    }

    /// Deactivate and wait until teardown has completed
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Channel open in flight, resolving to the channel name and the outcome
type PendingOpen = Pin<Box<dyn Future<Output = (String, RealtimeResult<ChannelHandle>)> + Send>>;

struct Worker {
    transport: Arc<dyn ChannelTransport>,
    subscriptions: SubscriptionSet,
    bindings: Vec<ChannelBinding>,
    options: RealtimeOptions,
    breaker: SharedBreaker,
    metrics: Arc<MetricsRegistry>,
    status: watch::Sender<ConnectionStatus>,
    cancelled: Arc<AtomicBool>,
    queue: DebounceQueue<ChangePayload>,
    channel: Option<ChannelHandle>,
    opening: Option<PendingOpen>,
    reconnect_at: Option<Instant>,
    safety_deadline: Option<Instant>,
}

impl Worker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        self.connect();

        loop {
            let safety = self.safety_deadline;
            let next_delivery = self.queue.next_deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                _ = sleep_until(safety) => self.on_safety_timeout(),

                _ = sleep_until(next_delivery) => self.deliver_due(),

                (name, opened) = pending_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(name, opened);
                }

                event = next_event(&mut self.channel) => self.on_channel_event(event),

                _ = sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        self.teardown();
    }

    /// Start opening a freshly named channel unless the circuit is open
    fn connect(&mut self) {
        let admission = lock(&self.breaker).admit(Instant::now());
        if let Admission::Rejected { retry_after } = admission {
            // Another activation with the same purpose opened the circuit
            self.metrics.increment_circuit_rejections();
            log_event_with_fields(
                Event::CircuitRejected,
                &[
                    ("hint", self.options.channel_hint.as_str()),
                    ("retry_after_ms", retry_after.as_millis().to_string().as_str()),
                ],
            );
            self.safety_deadline = None;
            self.set_status(ConnectionStatus::CircuitOpen { retry_after });
            return;
        }

        let name = channel_name(&self.options.channel_hint);
        self.set_status(ConnectionStatus::Connecting);
        self.safety_deadline = Some(Instant::now() + self.options.safety_timeout);

        let transport = Arc::clone(&self.transport);
        let bindings = self.bindings.clone();
        self.opening = Some(Box::pin(async move {
            let opened = transport.open(&name, &bindings).await;
            (name, opened)
        }));
    }

    fn on_opened(&mut self, name: String, opened: RealtimeResult<ChannelHandle>) {
        match opened {
            Ok(handle) => {
                self.metrics.increment_channels_opened();
                log_event_with_fields(
                    Event::ChannelOpened,
                    &[
                        ("channel", name.as_str()),
                        ("subscriptions", self.bindings.len().to_string().as_str()),
                        ("transport", self.transport.name()),
                    ],
                );
                self.channel = Some(handle);
            }
            Err(e) => self.on_failure(FailureKind::Transport(e.to_string())),
        }
    }

    fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Change(payload)) => self.enqueue(payload),
            Some(ChannelEvent::Status(ChannelStatus::Subscribed)) => self.on_subscribed(),
            Some(ChannelEvent::Status(ChannelStatus::ChannelError(reason))) => {
                self.on_failure(FailureKind::ChannelError(reason))
            }
            Some(ChannelEvent::Status(ChannelStatus::TimedOut)) => {
                self.on_failure(FailureKind::TimedOut)
            }
            Some(ChannelEvent::Status(other)) => {
                trace_event(
                    Event::ChannelStatus,
                    &[("channel", self.channel_label()), ("status", other.to_string().as_str())],
                );
            }
            None => self.on_failure(FailureKind::ChannelError("event stream ended".into())),
        }
    }

    fn on_subscribed(&mut self) {
        lock(&self.breaker).record_success();
        self.safety_deadline = None;
        log_event_with_fields(Event::ChannelSubscribed, &[("channel", self.channel_label())]);
        self.set_status(ConnectionStatus::Connected);
    }

    fn on_failure(&mut self, kind: FailureKind) {
        let channel = self.channel_label().to_string();
        self.close_channel();
        self.metrics.increment_channel_failures();

        let now = Instant::now();
        let outcome = lock(&self.breaker).record_failure(now);

        log_event_with_fields(
            Event::ChannelFailed,
            &[("channel", channel.as_str()), ("reason", kind.to_string().as_str())],
        );

        self.safety_deadline = None;

        match outcome {
            FailureOutcome::Retry { attempt, backoff } => {
                log_event_with_fields(
                    Event::ChannelReconnecting,
                    &[
                        ("attempt", attempt.to_string().as_str()),
                        ("hint", self.options.channel_hint.as_str()),
                        ("retry_in_ms", backoff.as_millis().to_string().as_str()),
                    ],
                );
                self.reconnect_at = Some(now + backoff);
                self.set_status(ConnectionStatus::Reconnecting {
                    attempt,
                    retry_in: backoff,
                });
            }
            FailureOutcome::Opened { retry_after } => {
                log_event_with_fields(
                    Event::CircuitOpened,
                    &[
                        ("hint", self.options.channel_hint.as_str()),
                        ("retry_after_ms", retry_after.as_millis().to_string().as_str()),
                    ],
                );
                self.reconnect_at = None;
                self.set_status(ConnectionStatus::CircuitOpen { retry_after });
            }
        }
    }

    fn on_safety_timeout(&mut self) {
        self.safety_deadline = None;
        self.reconnect_at = None;

        log_event_with_fields(
            Event::SafetyTimeout,
            &[
                ("channel", self.channel_label()),
                ("timeout_ms", self.options.safety_timeout.as_millis().to_string().as_str()),
            ],
        );

        // An open still in flight is abandoned by dropping its future
        let abandoned = self.opening.take().is_some() || self.channel.is_some();
        if abandoned {
            self.close_channel();
            self.metrics.increment_channel_failures();
            let outcome = lock(&self.breaker).record_failure(Instant::now());
            if let FailureOutcome::Opened { retry_after } = outcome {
                log_event_with_fields(
                    Event::CircuitOpened,
                    &[
                        ("hint", self.options.channel_hint.as_str()),
                        ("retry_after_ms", retry_after.as_millis().to_string().as_str()),
                    ],
                );
                self.set_status(ConnectionStatus::CircuitOpen { retry_after });
                return;
            }
        }

        self.set_status(ConnectionStatus::Error(FailureKind::SafetyTimeout));
    }

    fn enqueue(&mut self, payload: ChangePayload) {
        let keys = self.subscriptions.matching(&payload);
        if keys.is_empty() {
            trace_event(
                Event::FrameRejected,
                &[("reason", "no matching subscription"), ("table", payload.table.as_str())],
            );
            return;
        }

        let now = Instant::now();
        for key in keys {
            if self.queue.enqueue(key, payload.clone(), now) {
                self.metrics.increment_events_superseded();
            }
        }
    }

    fn deliver_due(&mut self) {
        for (key, payload) in self.queue.drain_due(Instant::now()) {
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Some(descriptor) = self.subscriptions.get(&key) {
                descriptor.deliver(payload);
                self.metrics.increment_deliveries();
            }
        }
    }

    fn teardown(&mut self) {
        let cancelled = self.queue.clear();
        if cancelled > 0 {
            self.metrics.add_deliveries_cancelled(cancelled as u64);
            log_event_with_fields(
                Event::DeliveriesCancelled,
                &[
                    ("count", cancelled.to_string().as_str()),
                    ("hint", self.options.channel_hint.as_str()),
                ],
            );
        }

        self.opening = None;
        self.close_channel();
        self.reconnect_at = None;
        self.safety_deadline = None;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            log_event_with_fields(Event::ChannelClosed, &[("channel", channel.name())]);
            channel.close();
        }
    }

    fn channel_label(&self) -> &str {
        self.channel.as_ref().map(ChannelHandle::name).unwrap_or("-")
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn pending_open(opening: &mut Option<PendingOpen>) -> (String, RealtimeResult<ChannelHandle>) {
    match opening {
        Some(open) => open.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_event(channel: &mut Option<ChannelHandle>) -> Option<ChannelEvent> {
    match channel {
        Some(handle) => handle.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_unique_and_prefixed() {
        let a = channel_name("student-chat");
        let b = channel_name("student-chat");
        assert!(a.starts_with("student-chat-"));
        assert_ne!(a, b);

        let suffix = a.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 7);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_options_circuit_config() {
        let options = RealtimeOptions {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            ..RealtimeOptions::for_channel("feed")
        };
        assert_eq!(options.circuit_config().cooldown(), Duration::from_secs(64));
        assert_eq!(options.channel_hint, "feed");
    }
}
