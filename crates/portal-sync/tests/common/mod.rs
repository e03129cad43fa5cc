//! Shared fixtures for the portal-sync integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use url::Url;

use portal_core::{ItemType, ListParams, Path, ResultPage, Status};
use portal_sync::{
    LocalStore, Notice, NoticeLevel, Notifier, Response, RestEndpoints, SendOptions,
    SessionGuard, Store, SyncEngine, SyncError, SyncResult, Transport,
};

pub const API_BASE: &str = "https://api.portal.test";

// =============================================================================
// Scripted Transport
// =============================================================================

enum Reply {
    Now(SyncResult<Response>),
    Gated(oneshot::Receiver<SyncResult<Response>>),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub url: Url,
    pub options: SendOptions,
}

/// Answers requests from a queue of scripted replies, in order.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, reply: SyncResult<Response>) {
        self.replies.lock().unwrap().push_back(Reply::Now(reply));
    }

    pub fn reply_ok(&self, cargo: Value) {
        self.reply(Ok(Response::ok(cargo)));
    }

    /// Queue a reply that is held back until the returned sender fires.
    pub fn gate(&self) -> oneshot::Sender<SyncResult<Response>> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(Reply::Gated(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, url: &Url, options: SendOptions) -> SyncResult<Response> {
        self.calls.lock().unwrap().push(Call {
            url: url.clone(),
            options,
        });
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Now(reply)) => reply,
            Some(Reply::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(SyncError::ConnectionFailed("gate dropped".into()))),
            None => Err(SyncError::ConnectionFailed("no scripted reply".into())),
        }
    }
}

// =============================================================================
// Notifier and Session
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices().iter().filter(|n| n.level == level).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn dismiss(&self, id: uuid::Uuid) {
        self.notices.lock().unwrap().retain(|n| n.id != id);
    }
}

#[derive(Default)]
pub struct CountingSession {
    calls: AtomicUsize,
    reject: bool,
}

impl CountingSession {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reject: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionGuard for CountingSession {
    async fn revalidate(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            Err(SyncError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub store: Store,
    pub engine: SyncEngine,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub session: Arc<CountingSession>,
}

pub fn harness() -> Harness {
    harness_with(CountingSession::accepting(), None)
}

pub fn harness_with(session: Arc<CountingSession>, local: Option<Arc<dyn LocalStore>>) -> Harness {
    let store = Store::new();
    let transport = ScriptedTransport::new();
    let notifier = RecordingNotifier::new();

    let mut builder = SyncEngine::builder(store.clone())
        .with_transport(transport.clone())
        .with_endpoints(Arc::new(RestEndpoints::new(API_BASE).unwrap()))
        .with_notifier(notifier.clone())
        .with_session_guard(session.clone());
    if let Some(local) = local {
        builder = builder.with_local_store(local);
    }

    Harness {
        store,
        engine: builder.build().unwrap(),
        transport,
        notifier,
        session,
    }
}

pub fn item_path(status: Status, id: &str) -> Path {
    Path::item(status, &ItemType::Advert, id, None)
}

pub fn advert_list(status: Status) -> ListParams {
    ListParams::new(ItemType::Advert, status)
}

pub fn page_json(ids: &[&str], next: Option<&str>) -> Value {
    let hits: Vec<Value> = ids
        .iter()
        .map(|id| json!({"@type": "Advert", "id": id}))
        .collect();
    let mut page = json!({"hits": hits, "total": ids.len()});
    if let Some(next) = next {
        page["next"] = json!(next);
    }
    page
}

pub fn hit_ids(page: &Value) -> Vec<String> {
    ResultPage::from_value(page.clone())
        .unwrap()
        .hits
        .into_iter()
        .map(|hit| hit.id)
        .collect()
}

/// Let spawned tasks run to their next await point.
pub async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
