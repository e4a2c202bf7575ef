//! WebSocket bridge transport.
//!
//! A local bridge process owns the messaging service's protocol and speaks
//! JSON frames to us, one frame per text message:
//!
//! ```text
//! -> {"type":"connect","mode":"codebot","credentials":"<base64>"}
//! -> {"type":"send","id":7,"conversation_id":"...","content":{"kind":"text","text":"hi"},"quoted":"ABC"}
//! -> {"type":"group_metadata","id":8,"conversation_id":"120363@g.us"}
//! -> {"type":"close"}
//! <- {"type":"creds","data":"<base64>"}
//! <- {"type":"connection","status":"close","status_code":401}
//! <- {"type":"message","conversation_id":"...","participant":"...","text":"!ping"}
//! <- {"type":"response","id":7,"ok":true}
//! ```
//!
//! Requests carry an id and are matched to their `response` frame through a
//! table of pending oneshot senders.

use super::{
    AuthMode, Connection, ConnectionUpdate, DisconnectReason, LinkStatus, Transport,
    TransportEvent, TransportSession,
};
use crate::error::BotError;
use crate::models::{GroupContext, InboundEvent, OutboundContent, SendOptions};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{TimeZone, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<ResponseFrame>>>>;
const GROUP_SUFFIX: &str = "@g.us";

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutgoingFrame<'a> {
    Connect {
        mode: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        credentials: Option<String>,
    },
    Send {
        id: u64,
        conversation_id: &'a str,
        content: &'a OutboundContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        quoted: Option<&'a str>,
    },
    GroupMetadata {
        id: u64,
        conversation_id: &'a str,
    },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IncomingFrame {
    Creds {
        data: String,
    },
    Connection {
        status: String,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        qr: Option<String>,
    },
    Message(MessageFrame),
    Response(ResponseFrame),
}

#[derive(Debug, Deserialize)]
struct MessageFrame {
    conversation_id: String,
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    push_name: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ResponseFrame {
    id: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GroupMetadata {
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    id: String,
    #[serde(default)]
    admin: Option<String>,
}

/// Connects to the bridge at a `ws://` URL.
pub struct BridgeTransport {
    url: String,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
        mode: AuthMode,
        credentials: Option<Vec<u8>>,
    ) -> Result<Connection, BotError> {
        log::info!("[BRIDGE] Connecting to {} ({} mode)", self.url, mode);

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| BotError::transport(format!("bridge connect to {} failed: {}", self.url, e)))?;
        let (writer, reader) = ws_stream.split();

        let session = Arc::new(BridgeSession {
            writer: Mutex::new(writer),
            pending: PendingMap::default(),
            next_id: AtomicU64::new(1),
        });

        let hello = OutgoingFrame::Connect {
            mode: mode.as_str(),
            credentials: credentials.map(|blob| BASE64.encode(blob)),
        };
        session.write_frame(&hello).await?;

        // Unbounded so response frames are never stuck behind queued messages
        // while a dispatch waits for one of them.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(reader, session.pending.clone(), event_tx));

        Ok(Connection {
            session,
            events: event_rx,
        })
    }
}

struct BridgeSession {
    writer: Mutex<SplitSink<WsStream, Message>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl BridgeSession {
    async fn write_frame(&self, frame: &OutgoingFrame<'_>) -> Result<(), BotError> {
        let json = serde_json::to_string(frame)
            .map_err(|e| BotError::transport(format!("failed to encode frame: {}", e)))?;
        log::debug!("[BRIDGE] >>> {}", json);
        self.writer
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(|e| BotError::transport(format!("bridge write failed: {}", e)))
    }

    /// Send a request frame and wait for the matching response.
    async fn request<'a>(
        &self,
        build: impl FnOnce(u64) -> OutgoingFrame<'a> + Send,
    ) -> Result<Option<Value>, BotError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Registered before sending so a fast response cannot be missed.
        let mut request = PendingRequest::register(&self.pending, id);
        self.write_frame(&build(id)).await?;

        let response = request.response().await?;
        if response.ok {
            Ok(response.data)
        } else {
            Err(BotError::transport(
                response.error.unwrap_or_else(|| "bridge request failed".to_string()),
            ))
        }
    }
}

/// A request waiting for its `response` frame. Dropping it, including when
/// the caller's timeout cancels the wait, removes the pending entry.
struct PendingRequest<'a> {
    pending: &'a PendingMap,
    id: u64,
    rx: oneshot::Receiver<ResponseFrame>,
}

impl<'a> PendingRequest<'a> {
    fn register(pending: &'a PendingMap, id: u64) -> Self {
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(id, tx);
        Self { pending, id, rx }
    }

    async fn response(&mut self) -> Result<ResponseFrame, BotError> {
        (&mut self.rx)
            .await
            .map_err(|_| BotError::transport("bridge connection closed before response"))
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl TransportSession for BridgeSession {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError> {
        self.request(|id| OutgoingFrame::Send {
            id,
            conversation_id,
            content: &content,
            quoted: options.quoted.as_deref(),
        })
        .await
        .map(|_| ())
    }

    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError> {
        let data = self
            .request(|id| OutgoingFrame::GroupMetadata { id, conversation_id })
            .await?
            .ok_or_else(|| BotError::transport("group metadata response without data"))?;
        group_from_metadata(conversation_id, data)
    }

    async fn close(&self) -> Result<(), BotError> {
        // Best effort: the bridge may already be gone.
        let _ = self.write_frame(&OutgoingFrame::Close).await;
        self.writer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| BotError::transport(format!("bridge close failed: {}", e)))
    }
}

async fn read_loop<R>(
    mut reader: R,
    pending: PendingMap,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = reader.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                log::info!("[BRIDGE] Bridge closed the socket");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("[BRIDGE] Read error: {}", e);
                break;
            }
        };
        log::debug!("[BRIDGE] <<< {}", text);

        let frame = match serde_json::from_str::<IncomingFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[BRIDGE] Ignoring malformed frame: {}", e);
                continue;
            }
        };

        match frame {
            IncomingFrame::Response(response) => {
                let waiter = pending.lock().remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => log::debug!("[BRIDGE] Response for unknown request {}", response.id),
                }
            }
            other => {
                let Some(event) = frame_to_event(other) else {
                    continue;
                };
                if events.send(event).is_err() {
                    // Connection manager dropped the stream.
                    break;
                }
            }
        }
    }

    // Fail every request still waiting for a response.
    pending.lock().clear();
}

fn frame_to_event(frame: IncomingFrame) -> Option<TransportEvent> {
    match frame {
        IncomingFrame::Creds { data } => match BASE64.decode(data.as_bytes()) {
            Ok(blob) => Some(TransportEvent::CredentialUpdate(blob)),
            Err(e) => {
                log::warn!("[BRIDGE] Credential update is not valid base64: {}", e);
                None
            }
        },
        IncomingFrame::Connection { status, status_code, qr } => {
            let update = match status.as_str() {
                "open" => ConnectionUpdate::open(),
                "close" => ConnectionUpdate::closed(
                    status_code
                        .map(DisconnectReason::from_status_code)
                        .unwrap_or(DisconnectReason::ConnectionClosed),
                ),
                "connecting" => ConnectionUpdate {
                    status: LinkStatus::Connecting,
                    reason: None,
                    challenge: qr,
                },
                other => {
                    log::warn!("[BRIDGE] Unknown connection status '{}'", other);
                    return None;
                }
            };
            Some(TransportEvent::ConnectionState(update))
        }
        IncomingFrame::Message(msg) => Some(TransportEvent::InboundMessage(message_to_event(msg))),
        IncomingFrame::Response(_) => None,
    }
}

fn message_to_event(msg: MessageFrame) -> InboundEvent {
    let is_group = msg.conversation_id.ends_with(GROUP_SUFFIX);
    let actor = msg
        .participant
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| msg.conversation_id.clone());

    let mut event = InboundEvent::new(msg.conversation_id, actor, msg.text, is_group);
    if let Some(ts) = msg.timestamp.and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
        event = event.with_timestamp(ts);
    }
    if let Some(id) = msg.message_id {
        event = event.with_message_id(id);
    }
    if let Some(name) = msg.push_name {
        event = event.with_sender_name(name);
    }
    event
}

/// `admin` is `"admin"` or `"superadmin"` for administrators, absent otherwise.
fn group_from_metadata(conversation_id: &str, data: Value) -> Result<GroupContext, BotError> {
    let metadata: GroupMetadata = serde_json::from_value(data)
        .map_err(|e| BotError::transport(format!("invalid group metadata: {}", e)))?;

    let mut group = GroupContext::new(conversation_id);
    for participant in metadata.participants {
        match participant.admin.as_deref() {
            Some("admin") | Some("superadmin") => group = group.with_admin(participant.id),
            _ => group = group.with_member(participant.id),
        }
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn event_of(raw: &str) -> Option<TransportEvent> {
        frame_to_event(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn test_connect_frame_encoding() {
        let frame = OutgoingFrame::Connect {
            mode: AuthMode::Resume.as_str(),
            credentials: Some(BASE64.encode(b"blob")),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "connect", "mode": "codebot", "credentials": "YmxvYg=="}));
    }

    #[test]
    fn test_send_frame_encoding() {
        let content = OutboundContent::with_mentions("hi", vec!["1@s.whatsapp.net".to_string()]);
        let frame = OutgoingFrame::Send {
            id: 3,
            conversation_id: "g@g.us",
            content: &content,
            quoted: Some("M1"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["content"]["kind"], "text");
        assert_eq!(value["content"]["mentions"][0], "1@s.whatsapp.net");
        assert_eq!(value["quoted"], "M1");
        assert_eq!(serde_json::to_value(&OutgoingFrame::Close).unwrap(), json!({"type": "close"}));
    }

    #[test]
    fn test_connection_frames() {
        match event_of(r#"{"type":"connection","status":"close","status_code":401}"#) {
            Some(TransportEvent::ConnectionState(update)) => {
                assert_eq!(update, ConnectionUpdate::closed(DisconnectReason::LoggedOut));
            }
            other => panic!("unexpected {:?}", other),
        }
        match event_of(r#"{"type":"connection","status":"connecting","qr":"2@abc"}"#) {
            Some(TransportEvent::ConnectionState(update)) => {
                assert_eq!(update, ConnectionUpdate::challenge("2@abc"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(event_of(r#"{"type":"connection","status":"weird"}"#).is_none());
    }

    #[test]
    fn test_creds_frame_decodes_base64() {
        match event_of(r#"{"type":"creds","data":"YmxvYg=="}"#) {
            Some(TransportEvent::CredentialUpdate(blob)) => assert_eq!(blob, b"blob"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(event_of(r#"{"type":"creds","data":"***"}"#).is_none());
    }

    #[test]
    fn test_group_message_frame() {
        let raw = r#"{"type":"message","conversation_id":"120363@g.us","participant":"111@s.whatsapp.net",
                      "text":"!ping","message_id":"ABC","push_name":"Ana","timestamp":1700000000}"#;
        match event_of(raw) {
            Some(TransportEvent::InboundMessage(event)) => {
                assert!(event.is_group);
                assert_eq!(event.actor_id, "111@s.whatsapp.net");
                assert_eq!(event.message_id.as_deref(), Some("ABC"));
                assert_eq!(event.sender_label(), "Ana");
                assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_private_message_actor_is_conversation() {
        let raw = r#"{"type":"message","conversation_id":"222@s.whatsapp.net","text":"hola"}"#;
        match event_of(raw) {
            Some(TransportEvent::InboundMessage(event)) => {
                assert!(!event.is_group);
                assert_eq!(event.actor_id, "222@s.whatsapp.net");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_group_metadata_admins() {
        let data = json!({
            "participants": [
                {"id": "1@s.whatsapp.net", "admin": "superadmin"},
                {"id": "2@s.whatsapp.net", "admin": "admin"},
                {"id": "3@s.whatsapp.net", "admin": null},
                {"id": "4@s.whatsapp.net"}
            ]
        });
        let group = group_from_metadata("g@g.us", data).unwrap();
        assert_eq!(group.participants.len(), 4);
        assert!(group.is_admin("1@s.whatsapp.net"));
        assert!(group.is_admin("2@s.whatsapp.net"));
        assert!(!group.is_admin("3@s.whatsapp.net"));
        assert!(!group.is_admin("4@s.whatsapp.net"));
        assert!(group_from_metadata("g@g.us", json!({"participants": 3})).is_err());
    }

    type WsResult = Result<Message, tokio_tungstenite::tungstenite::Error>;

    fn text_frame(raw: String) -> WsResult {
        Ok(Message::Text(raw))
    }

    #[tokio::test]
    async fn test_response_delivered_behind_message_backlog() {
        let pending = PendingMap::default();
        let mut request = PendingRequest::register(&pending, 1);

        let mut frames = vec![text_frame(r#"{"type":"connection","status":"open"}"#.to_string())];
        for i in 0..300 {
            frames.push(text_frame(format!(
                r#"{{"type":"message","conversation_id":"120363@g.us","participant":"{}@s.whatsapp.net","text":"!ping"}}"#,
                i
            )));
        }
        frames.push(text_frame(r#"{"type":"response","id":1,"ok":true}"#.to_string()));

        // Nobody drains the events while the response is awaited.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            futures_util::stream::iter(frames),
            pending.clone(),
            event_tx,
        ));

        let response = tokio::time::timeout(Duration::from_secs(5), request.response())
            .await
            .expect("response stuck behind queued messages")
            .unwrap();
        assert!(response.ok);
        reader.await.unwrap();

        let mut queued = 0;
        while event_rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 301);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_leaves_no_pending_entry() {
        let pending = PendingMap::default();
        {
            let mut request = PendingRequest::register(&pending, 7);
            assert_eq!(pending.lock().len(), 1);
            let waited = tokio::time::timeout(Duration::from_secs(20), request.response()).await;
            assert!(waited.is_err());
        }
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_closed_stream_fails_waiting_requests() {
        let pending = PendingMap::default();
        let mut request = PendingRequest::register(&pending, 2);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        read_loop(futures_util::stream::iter(Vec::<WsResult>::new()), pending.clone(), event_tx).await;
        assert!(request.response().await.is_err());
    }
}
