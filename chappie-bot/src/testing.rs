//! Test doubles shared by the unit tests.

use crate::connection::{ConnectionState, CredentialStore, SessionHandle};
use crate::error::BotError;
use crate::messenger::{GroupDirectory, Messenger};
use crate::models::{GroupContext, OutboundContent, SendOptions};
use crate::quota::Clock;
use crate::registry::{CommandDescriptor, ReplyHandler};
use crate::transport::{AuthMode, Connection, Transport, TransportEvent, TransportSession};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub conversation_id: String,
    pub content: OutboundContent,
    pub options: SendOptions,
}

fn texts_of(sent: &[SentMessage]) -> Vec<String> {
    sent.iter()
        .filter_map(|m| m.content.as_text().map(str::to_string))
        .collect()
}

/// Messenger that records sends and serves canned groups.
#[derive(Default)]
pub struct RecordingMessenger {
    groups: HashMap<String, GroupContext>,
    sent: Mutex<Vec<SentMessage>>,
    group_fetches: AtomicUsize,
    fail_sends: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: GroupContext) -> Self {
        self.groups.insert(group.conversation_id.clone(), group);
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        texts_of(&self.sent.lock())
    }

    pub fn group_fetches(&self) -> usize {
        self.group_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupDirectory for RecordingMessenger {
    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError> {
        self.group_fetches.fetch_add(1, Ordering::SeqCst);
        self.groups
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| BotError::transport(format!("unknown group {}", conversation_id)))
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError> {
        if self.fail_sends {
            return Err(BotError::transport("send refused"));
        }
        self.sent.lock().push(SentMessage {
            conversation_id: conversation_id.to_string(),
            content,
            options,
        });
        Ok(())
    }
}

/// Descriptor with every gate off, replying "ok".
pub fn descriptor(name: &str) -> CommandDescriptor {
    CommandDescriptor {
        name: name.to_string(),
        aliases: Vec::new(),
        requires_owner: false,
        requires_admin: false,
        quota_exempt: false,
        group_only: false,
        private_only: false,
        description: String::new(),
        category: "general".to_string(),
        source: PathBuf::from(format!("/commands/{}.toml", name)),
        handler: Arc::new(ReplyHandler::new("ok")),
    }
}

/// Write `<dir>/<file>` with `name = "<name>"` followed by `extra`.
pub fn write_manifest(dir: &Path, file: &str, name: &str, extra: &str) {
    std::fs::write(dir.join(file), format!("name = \"{}\"\n{}\n", name, extra)).unwrap();
}

pub fn session_handle(state: ConnectionState) -> (watch::Sender<ConnectionState>, SessionHandle) {
    let (tx, rx) = watch::channel(state);
    (tx, SessionHandle::new(rx, Duration::from_secs(5)))
}

/// Transport session recording what goes through it.
#[derive(Default)]
pub struct MockSession {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closes: Arc<AtomicUsize>,
    stalled: bool,
}

impl MockSession {
    /// Sends never complete.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        texts_of(&self.sent.lock())
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.sent.lock().push(SentMessage {
            conversation_id: conversation_id.to_string(),
            content,
            options,
        });
        Ok(())
    }

    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError> {
        Err(BotError::transport(format!("no metadata for {}", conversation_id)))
    }

    async fn close(&self) -> Result<(), BotError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Events one scripted session delivers. The stream ends after the last
/// event unless `keep_open` is set.
pub struct MockScript {
    events: Vec<TransportEvent>,
    keep_open: bool,
}

impl MockScript {
    pub fn new(events: Vec<TransportEvent>) -> Self {
        Self {
            events,
            keep_open: false,
        }
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

/// Transport replaying one script per `connect`; fails once they run out.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<MockScript>>,
    connects: Mutex<Vec<(AuthMode, Option<Vec<u8>>)>>,
    open_streams: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closes: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn connects(&self) -> Vec<(AuthMode, Option<Vec<u8>>)> {
        self.connects.lock().clone()
    }

    /// Everything sent through any session.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        mode: AuthMode,
        credentials: Option<Vec<u8>>,
    ) -> Result<Connection, BotError> {
        self.connects.lock().push((mode, credentials));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| BotError::transport("connection refused"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        for event in script.events {
            tx.send(event).unwrap();
        }
        if script.keep_open {
            self.open_streams.lock().push(tx);
        }

        let session = MockSession {
            sent: self.sent.clone(),
            closes: self.closes.clone(),
            stalled: false,
        };
        Ok(Connection {
            session: Arc::new(session),
            events: rx,
        })
    }
}

pub struct MemoryCredentialStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new(blob: Option<&[u8]>) -> Self {
        Self {
            blob: Mutex::new(blob.map(<[u8]>::to_vec)),
        }
    }

    pub fn blob(&self) -> Option<Vec<u8>> {
        self.blob.lock().clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Vec<u8>>, BotError> {
        Ok(self.blob())
    }

    fn save(&self, blob: &[u8]) -> Result<(), BotError> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), BotError> {
        *self.blob.lock() = None;
        Ok(())
    }
}
