//! # WebSocket Transport
//!
//! Change-feed transport speaking the BaaS realtime protocol (Phoenix
//! channel framing over a WebSocket).
//!
//! One socket per channel. The socket task joins the channel with one
//! `postgres_changes` listener per binding, forwards changes and status
//! transitions to the [`ChannelHandle`], sends heartbeats, and leaves the
//! channel when the handle is closed or dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangePayload;
use super::subscription::ChannelBinding;
use super::transport::{
    ChannelCommand, ChannelEvent, ChannelEventSender, ChannelHandle, ChannelStatus,
    ChannelTransport,
};
use crate::observability::{log_event_with_fields, Event};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reference used for the join frame; replies carrying it answer the join
const JOIN_REF: &str = "1";

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Realtime base URL, e.g. `wss://<project>.example.co/realtime/v1`
    pub url: String,

    /// Project API key sent as the `apikey` query parameter
    pub api_key: String,

    /// User access token for row-level security
    pub access_token: Option<String>,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// How long to wait for the socket handshake, and then for the join reply
    pub join_timeout: Duration,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            access_token: None,
            heartbeat_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Socket endpoint including query parameters
    pub fn endpoint(&self) -> String {
        format!(
            "{}/websocket?apikey={}&vsn=1.0.0",
            self.url.trim_end_matches('/'),
            self.api_key
        )
    }
}

/// One Phoenix channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, reference: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference,
        }
    }

    /// Join frame for a channel with the given bindings
    pub fn join(topic: &str, bindings: &[ChannelBinding], access_token: Option<&str>) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": bindings,
                "private": false
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = json!(token);
        }
        Self::new(topic, "phx_join", payload, Some(JOIN_REF.to_string()))
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self::new(topic, "phx_leave", json!({}), Some(reference.to_string()))
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), Some(reference.to_string()))
    }
}

/// Channel topic for a channel name
pub fn topic_for(name: &str) -> String {
    format!("realtime:{}", name)
}

/// Translate a server frame for `topic` into a channel event
pub fn interpret(message: &PhoenixMessage, topic: &str) -> RealtimeResult<Option<ChannelEvent>> {
    if message.topic != topic {
        return Ok(None);
    }

    let status = message.payload.get("status").and_then(Value::as_str);

    let event = match message.event.as_str() {
        "phx_reply" if message.reference.as_deref() == Some(JOIN_REF) => match status {
            Some("ok") => Some(ChannelEvent::Status(ChannelStatus::Subscribed)),
            _ => Some(ChannelEvent::Status(ChannelStatus::ChannelError(
                reply_reason(&message.payload),
            ))),
        },
        "system" if status == Some("error") => Some(ChannelEvent::Status(
            ChannelStatus::ChannelError(reply_reason(&message.payload)),
        )),
        "postgres_changes" => {
            let data = message
                .payload
                .get("data")
                .ok_or_else(|| RealtimeError::InvalidMessage("postgres_changes without data".into()))?;
            Some(ChannelEvent::Change(ChangePayload::from_wire(data)?))
        }
        "phx_error" => Some(ChannelEvent::Status(ChannelStatus::ChannelError(
            "server reported channel error".into(),
        ))),
        "phx_close" => Some(ChannelEvent::Status(ChannelStatus::Closed)),
        _ => None,
    };

    Ok(event)
}

fn reply_reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("join rejected")
        .to_string()
}

/// Realtime transport over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn open(&self, name: &str, bindings: &[ChannelBinding]) -> RealtimeResult<ChannelHandle> {
        let (mut socket, _response) =
            tokio::time::timeout(self.config.join_timeout, connect_async(self.config.endpoint()))
                .await
                .map_err(|_| RealtimeError::JoinTimeout)?
                .map_err(|e| RealtimeError::ConnectionError(e.to_string()))?;

        let topic = topic_for(name);
        let join = PhoenixMessage::join(&topic, bindings, self.config.access_token.as_deref());
        send_frame(&mut socket, &join)
            .await
            .map_err(|e| RealtimeError::ConnectionError(e.to_string()))?;

        let (handle, events, commands) = ChannelHandle::pair(name);
        let _ = events.send(ChannelEvent::Status(ChannelStatus::Joining));

        tokio::spawn(run_socket(socket, topic, events, commands, self.config.clone()));

        Ok(handle)
    }
}

async fn send_frame(
    socket: &mut (impl Sink<Message, Error = WsError> + Unpin),
    frame: &PhoenixMessage,
) -> Result<(), WsError> {
    let text = serde_json::to_string(frame).map_err(|e| WsError::Io(std::io::Error::other(e)))?;
    socket.send(Message::Text(text)).await
}

async fn run_socket(
    socket: Socket,
    topic: String,
    events: ChannelEventSender,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    config: WebSocketConfig,
) {
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    let join_deadline = tokio::time::sleep(config.join_timeout);
    tokio::pin!(join_deadline);

    let mut joined = false;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            // Close requested, or the handle was dropped
            _ = commands.recv() => {
                let _ = send_frame(&mut sink, &PhoenixMessage::leave(&topic, next_ref)).await;
                let _ = sink.close().await;
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let event = serde_json::from_str::<PhoenixMessage>(&text)
                            .map_err(|e| RealtimeError::InvalidMessage(e.to_string()))
                            .and_then(|message| interpret(&message, &topic));

                        match event {
                            Ok(Some(event)) => {
                                if event == ChannelEvent::Status(ChannelStatus::Subscribed) {
                                    joined = true;
                                }
                                if events.send(event).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                log_event_with_fields(
                                    Event::FrameRejected,
                                    &[("reason", e.to_string().as_str()), ("topic", topic.as_str())],
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            let _ = events.send(ChannelEvent::Status(ChannelStatus::ChannelError(
                                "failed to answer ping".into(),
                            )));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = events.send(ChannelEvent::Status(ChannelStatus::ChannelError(
                            "socket closed".into(),
                        )));
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(ChannelEvent::Status(ChannelStatus::ChannelError(
                            e.to_string(),
                        )));
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = heartbeat.tick() => {
                if let Err(e) = send_frame(&mut sink, &PhoenixMessage::heartbeat(next_ref)).await {
                    let _ = events.send(ChannelEvent::Status(ChannelStatus::ChannelError(
                        e.to_string(),
                    )));
                    break;
                }
                next_ref += 1;
            }

            _ = &mut join_deadline, if !joined => {
                let _ = events.send(ChannelEvent::Status(ChannelStatus::TimedOut));
                let _ = sink.close().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::event::{ChangeKind, EventFilter};

    fn binding() -> ChannelBinding {
        ChannelBinding {
            event: EventFilter::Insert,
            schema: "public".into(),
            table: "chat_messages".into(),
            filter: Some("conversation_id=eq.c1".into()),
        }
    }

    #[test]
    fn test_endpoint() {
        let config = WebSocketConfig::new("wss://demo.example.co/realtime/v1/", "anon");
        assert_eq!(
            config.endpoint(),
            "wss://demo.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn test_join_frame() {
        let join = PhoenixMessage::join("realtime:chat-1", &[binding()], Some("jwt"));
        let json = serde_json::to_value(&join).unwrap();

        assert_eq!(json["event"], "phx_join");
        assert_eq!(json["ref"], "1");
        assert_eq!(json["payload"]["access_token"], "jwt");

        let changes = &json["payload"]["config"]["postgres_changes"][0];
        assert_eq!(changes["event"], "INSERT");
        assert_eq!(changes["table"], "chat_messages");
        assert_eq!(changes["filter"], "conversation_id=eq.c1");
    }

    #[test]
    fn test_interpret_join_replies() {
        let topic = "realtime:chat-1";
        let ok = PhoenixMessage::new(
            topic,
            "phx_reply",
            json!({"status": "ok", "response": {}}),
            Some("1".into()),
        );
        assert_eq!(
            interpret(&ok, topic).unwrap(),
            Some(ChannelEvent::Status(ChannelStatus::Subscribed))
        );

        let rejected = PhoenixMessage::new(
            topic,
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
            Some("1".into()),
        );
        assert_eq!(
            interpret(&rejected, topic).unwrap(),
            Some(ChannelEvent::Status(ChannelStatus::ChannelError("unauthorized".into())))
        );

        // Heartbeat replies are not join replies
        let heartbeat_reply =
            PhoenixMessage::new(topic, "phx_reply", json!({"status": "ok"}), Some("7".into()));
        assert_eq!(interpret(&heartbeat_reply, topic).unwrap(), None);
    }

    #[test]
    fn test_interpret_change() {
        let topic = "realtime:chat-1";
        let frame = PhoenixMessage::new(
            topic,
            "postgres_changes",
            json!({
                "ids": [1],
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "chat_messages",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "record": {"id": 1, "conversation_id": "c1"},
                    "old_record": {}
                }
            }),
            None,
        );

        match interpret(&frame, topic).unwrap() {
            Some(ChannelEvent::Change(payload)) => {
                assert_eq!(payload.kind, ChangeKind::Insert);
                assert_eq!(payload.table, "chat_messages");
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_interpret_ignores_other_topics_and_events() {
        let frame = PhoenixMessage::new("realtime:other", "phx_close", json!({}), None);
        assert_eq!(interpret(&frame, "realtime:chat-1").unwrap(), None);

        let presence = PhoenixMessage::new("realtime:chat-1", "presence_state", json!({}), None);
        assert_eq!(interpret(&presence, "realtime:chat-1").unwrap(), None);
    }

    #[test]
    fn test_interpret_errors_and_close() {
        let topic = "realtime:chat-1";
        let error = PhoenixMessage::new(topic, "phx_error", json!({}), None);
        assert!(matches!(
            interpret(&error, topic).unwrap(),
            Some(ChannelEvent::Status(ChannelStatus::ChannelError(_)))
        ));

        let system = PhoenixMessage::new(
            topic,
            "system",
            json!({"status": "error", "message": "replication slot busy"}),
            None,
        );
        assert_eq!(
            interpret(&system, topic).unwrap(),
            Some(ChannelEvent::Status(ChannelStatus::ChannelError(
                "replication slot busy".into()
            )))
        );

        let close = PhoenixMessage::new(topic, "phx_close", json!({}), None);
        assert_eq!(
            interpret(&close, topic).unwrap(),
            Some(ChannelEvent::Status(ChannelStatus::Closed))
        );
    }

    #[test]
    fn test_interpret_rejects_malformed_change() {
        let topic = "realtime:chat-1";
        let frame = PhoenixMessage::new(topic, "postgres_changes", json!({"ids": []}), None);
        assert!(interpret(&frame, topic).is_err());
    }
}
