//! # Sync Engine
//!
//! Status-aware CRUD on top of the [`Store`].
//!
//! ## Mutating Action Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run(save / publish / delete / ...)                                    │
//! │                                                                         │
//! │  1. resolve item ── supplied │ store (start status) │ stub             │
//! │  2. snapshot = deep copy                                               │
//! │  3. localStatus = saving, optimistic list edits                        │
//! │     send full item, or diff(previous → item)                           │
//! │           │                                                             │
//! │           ▼  (user may keep editing the live copy meanwhile)           │
//! │  4. reconcile(snapshot, live, fresh)  ── keyed fields by key           │
//! │  5. write: reconciled → server path (+ draft for a full publish)       │
//! │  6. delete: null both copies, prune every cached list                  │
//! │  7. localStatus = clean, error cleared                                 │
//! │                                                                         │
//! │  failure: localStatus = saveerror, message at the error path,          │
//! │           notification (unless swallow), session re-check on 401       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Read actions (`get`, `getornew`) go through [`Store::fetch`] and are
//! deduplicated per path; repeated reads of one path hand back the same
//! typed cell. Published reads try the local store first and refresh from
//! the server in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use portal_core::diff::diff;
use portal_core::page::{for_each_page_mut, is_page, prune_item};
use portal_core::reconcile::reconcile;
use portal_core::validation::{validate_item_id, validate_item_status, validate_type_name};
use portal_core::{
    Action, Item, ItemKey, ItemRef, ItemType, ListParams, LocalStatus, MergePolicy, Path,
    ResultPage, Status,
};

use crate::cell::Cell;
use crate::config::PortalConfig;
use crate::endpoint::{EndpointResolver, RestEndpoints};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalStore, NoLocalStore};
use crate::notify::{NoOpNotifier, NoSessionGuard, Notice, Notifier, SessionGuard};
use crate::store::{FetchOptions, Store};
use crate::transport::{
    HttpTransport, Method, RequestBody, SendOptions, Transport, TransportConfig,
};

// =============================================================================
// Settings
// =============================================================================

/// Cache and persistence knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a fetched item is reused. `None` keeps it until invalidated.
    pub item_cache_period: Option<Duration>,

    /// How long a fetched list is reused.
    pub list_cache_period: Option<Duration>,

    /// Write published items to the local store.
    pub persist_published: bool,

    /// Domain used when a request does not name one.
    pub domain: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            item_cache_period: None,
            list_cache_period: Some(Duration::from_secs(300)),
            persist_published: true,
            domain: None,
        }
    }
}

impl From<&PortalConfig> for EngineSettings {
    fn from(config: &PortalConfig) -> Self {
        EngineSettings {
            item_cache_period: config.cache.item_cache_period(),
            list_cache_period: config.cache.list_cache_period(),
            persist_published: config.cache.persist_published,
            domain: config.client.domain.clone(),
        }
    }
}

// =============================================================================
// Run Request
// =============================================================================

/// One action on one item.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub item_type: ItemType,
    pub id: String,
    pub action: Action,
    /// Use this item instead of the cached copy.
    pub item: Option<Value>,
    /// Send `diff(previous → item)` instead of the full item.
    pub previous: Option<Value>,
    /// Record failures without notifying the user.
    pub swallow: bool,
    pub domain: Option<String>,
}

impl RunRequest {
    pub fn new(item_type: ItemType, id: impl Into<String>, action: Action) -> Self {
        Self {
            item_type,
            id: id.into(),
            action,
            item: None,
            previous: None,
            swallow: false,
            domain: None,
        }
    }

    pub fn item(mut self, item: Value) -> Self {
        self.item = Some(item);
        self
    }

    pub fn previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn swallow(mut self) -> Self {
        self.swallow = true;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

#[derive(Debug, Clone)]
struct ActionContext {
    item_type: ItemType,
    id: String,
    action: Action,
    swallow: bool,
    domain: Option<String>,
    start: ItemKey,
    server: ItemKey,
    item: Option<Value>,
    previous: Option<Value>,
}

impl ActionContext {
    fn new(request: RunRequest, settings: &EngineSettings) -> Self {
        let domain = request.domain.or_else(|| settings.domain.clone());
        let start = ItemKey::new(
            request.item_type.clone(),
            request.id.clone(),
            request.action.start_status(),
        )
        .domain(domain.clone());
        let server = start.with_status(request.action.server_status());
        Self {
            item_type: request.item_type,
            id: request.id,
            action: request.action,
            swallow: request.swallow,
            domain,
            start,
            server,
            item: request.item,
            previous: request.previous,
        }
    }
}

/// Canonical JSON form of an item, so diffs never see envelope noise.
fn normalize(value: Value, item_type: &ItemType) -> Value {
    match Item::from_value_typed(value.clone(), item_type) {
        Ok(item) => item.to_value(),
        Err(_) => value,
    }
}

// =============================================================================
// Typed Views
// =============================================================================

/// Typed cell derived from one store cell.
struct Derived<T> {
    source: Cell<Value>,
    typed: Cell<T>,
}

type DerivedMap<T> = Mutex<HashMap<Path, Derived<T>>>;

/// Typed view of the store cell at `path`, reused for as long as the store
/// keeps handing out the same source cell.
fn derive<T, F>(views: &DerivedMap<T>, path: &Path, source: Cell<Value>, convert: F) -> Cell<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Value) -> SyncResult<T> + Send + Sync + 'static,
{
    let mut views = views.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(view) = views.get(path) {
        if Cell::ptr_eq(&view.source, &source) {
            // store writes land in the source cell in place
            if let (Some(value), true) = (source.value(), view.typed.is_resolved()) {
                if let Ok(typed) = convert(value) {
                    view.typed.replace(typed);
                }
            }
            return view.typed.clone();
        }
    }
    let typed = source.try_map(convert);
    views.insert(
        path.clone(),
        Derived {
            source,
            typed: typed.clone(),
        },
    );
    typed
}

// =============================================================================
// Engine
// =============================================================================

struct EngineInner {
    store: Store,
    transport: Arc<dyn Transport>,
    endpoints: Arc<dyn EndpointResolver>,
    local: Arc<dyn LocalStore>,
    notifier: Arc<dyn Notifier>,
    session: Arc<dyn SessionGuard>,
    policy: MergePolicy,
    settings: EngineSettings,
    items: DerivedMap<Item>,
    pages: DerivedMap<ResultPage>,
}

/// Runs actions against the server and keeps the store consistent.
///
/// Cheap to clone: clones share collaborators and the store.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.inner.store)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl SyncEngine {
    pub fn builder(store: Store) -> SyncEngineBuilder {
        SyncEngineBuilder::new(store)
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn merge_policy(&self) -> &MergePolicy {
        &self.inner.policy
    }

    /// Save feedback for one item.
    pub fn local_status(&self, item_type: &ItemType, id: &str) -> LocalStatus {
        self.inner
            .store
            .get(&Path::local_status(item_type, id))
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Display-safe message from the last failed `action` on this item.
    pub fn error_message(&self, item_type: &ItemType, id: &str, action: Action) -> Option<String> {
        self.inner
            .store
            .get(&Path::error(item_type, id, action))
            .and_then(|value| value.as_str().map(str::to_string))
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Run one action. The returned cell carries the item once the server
    /// has answered, and the optimistic item until then.
    pub fn run(&self, request: RunRequest) -> Cell<Item> {
        let ctx = ActionContext::new(request, &self.inner.settings);
        debug!(
            item_type = %ctx.item_type,
            id = %ctx.id,
            action = %ctx.action,
            "Running action"
        );

        let checked = validate_type_name(&ctx.item_type).and_then(|_| validate_item_id(&ctx.id));
        if let Err(e) = checked {
            let err = SyncError::from(e);
            self.record_failure(&ctx, &err);
            return Cell::failed(err);
        }

        if ctx.action.is_get_class() {
            self.get(ctx)
        } else {
            self.mutate(ctx)
        }
    }

    /// Edit one field (or, with an empty field path, the whole item) of a
    /// cached copy and mark the item dirty.
    pub fn set_value(&self, key: &ItemKey, field: &[&str], value: Value) -> SyncResult<()> {
        validate_type_name(&key.item_type)?;
        validate_item_id(&key.id)?;

        let path = field
            .iter()
            .fold(key.path(), |path, segment| path.child(*segment));
        self.inner.store.set(&path, value);
        self.set_local_status(&key.item_type, &key.id, LocalStatus::Dirty);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn get(&self, ctx: ActionContext) -> Cell<Item> {
        let store = &self.inner.store;
        let path = ctx.server.path();
        let interim = store.get(&path).unwrap_or_else(|| {
            Item::stub(ctx.item_type.clone(), &ctx.id, ctx.server.status).to_value()
        });
        let options = FetchOptions::new()
            .cache_period(self.inner.settings.item_cache_period)
            .interim(interim);

        let (fast_tx, fast_rx) = oneshot::channel::<()>();
        let engine = self.clone();
        let load_ctx = ctx.clone();
        let cell = store.fetch(
            &path,
            move || async move { engine.load_item(load_ctx, fast_tx).await },
            options,
        );

        // served from the local store: refresh once the cell has landed
        let engine = self.clone();
        let landed = cell.clone();
        let refresh_ctx = ctx.clone();
        tokio::spawn(async move {
            if fast_rx.await.is_ok() && landed.settled().await.is_ok() {
                engine.refresh(refresh_ctx).await;
            }
        });

        let item_type = ctx.item_type;
        derive(&self.inner.items, &path, cell, move |value| {
            Item::from_value_typed(value, &item_type).map_err(SyncError::from)
        })
    }

    async fn load_item(&self, ctx: ActionContext, fast_path: oneshot::Sender<()>) -> SyncResult<Value> {
        let path = ctx.server.path();
        if ctx.server.status == Status::Published {
            match self.inner.local.load(&path).await {
                Ok(Some(local)) => {
                    debug!(%path, "Serving item from local store");
                    let _ = fast_path.send(());
                    return Ok(normalize(local, &ctx.item_type));
                }
                Ok(None) => {}
                Err(e) => warn!(%path, error = %e, "Local store read failed"),
            }
        }

        match self.fetch_remote(&ctx).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.on_failure(&ctx, &err, false).await;
                Err(err)
            }
        }
    }

    async fn fetch_remote(&self, ctx: &ActionContext) -> SyncResult<Value> {
        let url = self.inner.endpoints.endpoint_for(
            &ctx.item_type,
            &ctx.id,
            ctx.server.status,
            ctx.domain.as_deref(),
        )?;
        let options = SendOptions {
            method: Method::for_action(ctx.action),
            body: Some(RequestBody {
                action: ctx.action,
                status: ctx.server.status,
                item: None,
                diff: None,
            }),
            swallow: ctx.swallow,
        };
        let cargo = self.inner.transport.send(&url, options).await?.into_cargo()?;
        let value = cargo.ok_or_else(|| {
            SyncError::DeserializationFailed(format!(
                "empty response for {} {}",
                ctx.item_type, ctx.id
            ))
        })?;
        let value = Item::from_value_typed(value, &ctx.item_type)?.to_value();
        self.persist(&ctx.server, &value).await;
        Ok(value)
    }

    async fn refresh(&self, ctx: ActionContext) {
        match self.fetch_remote(&ctx).await {
            Ok(fresh) => {
                debug!(item_type = %ctx.item_type, id = %ctx.id, "Refreshed item from server");
                self.inner.store.set(&ctx.server.path(), fresh);
            }
            Err(e) => {
                debug!(item_type = %ctx.item_type, id = %ctx.id, error = %e, "Background refresh failed")
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    fn mutate(&self, ctx: ActionContext) -> Cell<Item> {
        let store = &self.inner.store;
        let start_path = ctx.start.path();

        let live = store.get(&start_path);
        let resolved = match ctx.item.clone().or_else(|| live.clone()) {
            Some(value) => Item::from_value_typed(value, &ctx.item_type).map_err(SyncError::from),
            None if ctx.action.allows_stub() => Ok(Item::stub(
                ctx.item_type.clone(),
                &ctx.id,
                ctx.start.status,
            )),
            None => Err(SyncError::MissingItem {
                item_type: ctx.item_type.to_string(),
                id: ctx.id.clone(),
                action: ctx.action.to_string(),
            }),
        };
        let resolved = resolved.and_then(|item| match item.status {
            Some(status) => validate_item_status(status)
                .map(|_| item)
                .map_err(SyncError::from),
            None => Ok(item),
        });
        let item = match resolved {
            Ok(item) => item,
            Err(err) => {
                self.record_failure(&ctx, &err);
                return Cell::failed(err);
            }
        };
        let item_value = item.to_value();
        // a supplied item is what the user sees, so it is the baseline for
        // edits made while the request is in flight
        if ctx.item.is_some() || live.is_none() {
            store.set_with(&start_path, item_value.clone(), false);
        }

        let patch = ctx
            .previous
            .clone()
            .map(|previous| diff(&normalize(previous, &ctx.item_type), &item_value));
        if ctx.action == Action::Save && patch.as_ref().is_some_and(Vec::is_empty) {
            debug!(item_type = %ctx.item_type, id = %ctx.id, "Nothing changed, skipping save");
            self.settle_clean(&ctx.item_type, &ctx.id, ctx.action);
            return Cell::resolved(item);
        }

        let snapshot = item_value.clone();
        self.set_local_status(&ctx.item_type, &ctx.id, LocalStatus::Saving);
        let lists_mutated = self.optimistic_lists(&ctx, &item);

        let diff_based = patch.is_some();
        let body = RequestBody {
            action: ctx.action,
            status: ctx.server.status,
            item: if diff_based { None } else { Some(item_value) },
            diff: patch,
        };

        let engine = self.clone();
        Cell::spawn(
            async move {
                match engine.complete(&ctx, body, snapshot, diff_based).await {
                    Ok(item) => Ok(item),
                    Err(err) => {
                        engine.on_failure(&ctx, &err, lists_mutated).await;
                        Err(err)
                    }
                }
            },
            Some(item),
        )
    }

    async fn complete(
        &self,
        ctx: &ActionContext,
        body: RequestBody,
        snapshot: Value,
        diff_based: bool,
    ) -> SyncResult<Item> {
        let store = &self.inner.store;
        let url = self.inner.endpoints.endpoint_for(
            &ctx.item_type,
            &ctx.id,
            ctx.server.status,
            ctx.domain.as_deref(),
        )?;
        let options = SendOptions {
            method: Method::for_action(ctx.action),
            body: Some(body),
            swallow: ctx.swallow,
        };
        let cargo = self.inner.transport.send(&url, options).await?.into_cargo()?;

        if ctx.action == Action::Delete {
            self.remove_everywhere(ctx).await;
            self.settle_clean(&ctx.item_type, &ctx.id, ctx.action);
            info!(item_type = %ctx.item_type, id = %ctx.id, "Item deleted");
            return Ok(Item::from_value_typed(snapshot, &ctx.item_type)?);
        }

        let fresh_item = match cargo {
            Some(value) => Item::from_value_typed(value, &ctx.item_type)?,
            None => Item::from_value_typed(snapshot.clone(), &ctx.item_type)?,
        };
        let fresh = fresh_item.to_value();

        // a copy is a different item: edits on the source never carry over
        let reconciled = if ctx.action == Action::Copy {
            fresh
        } else {
            // edits made while the request was in flight
            let live = store
                .get(&ctx.start.path())
                .map(|value| normalize(value, &ctx.item_type))
                .unwrap_or_else(|| snapshot.clone());
            reconcile(&ctx.item_type, &snapshot, &live, &fresh, &self.inner.policy)?
        };

        let adopts = fresh_item.id != ctx.id
            && (ctx.id == portal_core::NEW_ID || ctx.action == Action::Copy);
        let (start, server) = if adopts {
            self.adopt_id(ctx, &fresh_item.id)
        } else {
            (ctx.start.clone(), ctx.server.clone())
        };

        store.set(&server.path(), reconciled.clone());
        match ctx.action {
            Action::Publish if !diff_based => store.set(&start.path(), reconciled.clone()),
            Action::Unpublish => {
                self.forget(&start.path());
                self.prune_lists(&ctx.item_type, &ctx.id, |status| {
                    status.includes(Status::Published) && !status.includes(Status::Draft)
                });
                if let Err(e) = self.inner.local.remove(&start.path()).await {
                    warn!(error = %e, "Failed to drop unpublished item from local store");
                }
            }
            _ => {}
        }
        self.persist(&server, &reconciled).await;
        self.settle_clean(&ctx.item_type, &server.id, ctx.action);

        info!(
            item_type = %ctx.item_type,
            id = %server.id,
            action = %ctx.action,
            "Action complete"
        );
        Ok(Item::from_value_typed(reconciled, &ctx.item_type)?)
    }

    /// Move a brand-new item (or a fresh copy) to the id the server assigned.
    fn adopt_id(&self, ctx: &ActionContext, new_id: &str) -> (ItemKey, ItemKey) {
        let store = &self.inner.store;
        if ctx.id == portal_core::NEW_ID {
            store.set_with(&ctx.start.path(), Value::Null, false);
        }
        store.set(&Path::focus(&ctx.item_type), Value::String(new_id.to_string()));
        self.settle_clean(&ctx.item_type, &ctx.id, ctx.action);
        info!(item_type = %ctx.item_type, new_id, "Adopted server-assigned id");

        let start = ItemKey {
            id: new_id.to_string(),
            ..ctx.start.clone()
        };
        let server = start.with_status(ctx.server.status);
        (start, server)
    }

    async fn remove_everywhere(&self, ctx: &ActionContext) {
        let store = &self.inner.store;
        for status in [Status::Draft, Status::Published] {
            self.forget(&ctx.start.with_status(status).path());
        }
        let pruned = store.update_at(&Path::root(), |tree| {
            prune_item(tree, Some(&ctx.item_type), &ctx.id)
        });
        debug!(item_type = %ctx.item_type, id = %ctx.id, pruned, "Pruned deleted item from lists");

        let published = ctx.start.with_status(Status::Published).path();
        if let Err(e) = self.inner.local.remove(&published).await {
            warn!(error = %e, "Failed to drop deleted item from local store");
        }
    }

    /// Null the copy at `path` and drop any fetch cached for it.
    fn forget(&self, path: &Path) {
        self.inner.store.set(path, Value::Null);
        self.inner.store.invalidate(path);
    }

    async fn persist(&self, key: &ItemKey, value: &Value) {
        if key.status != Status::Published || !self.inner.settings.persist_published {
            return;
        }
        if let Err(e) = self.inner.local.save(&key.path(), value).await {
            warn!(item_type = %key.item_type, id = %key.id, error = %e, "Failed to persist item locally");
        }
    }

    // =========================================================================
    // Optimistic List Edits
    // =========================================================================

    /// Returns true if any cached list was touched.
    fn optimistic_lists(&self, ctx: &ActionContext, item: &Item) -> bool {
        match ctx.action {
            Action::Publish => {
                let mut hit = ItemRef::from_item(item);
                hit.status = Some(Status::Published);
                self.edit_lists(&ctx.item_type, |status| status.includes(Status::Published), |page| {
                    page.remove(&hit.id);
                    page.add(hit.clone(), Some(0));
                    true
                }) > 0
            }
            Action::Archive => {
                let mut hit = ItemRef::from_item(item);
                hit.status = Some(Status::Archived);
                self.edit_lists(&ctx.item_type, |status| status.includes(Status::Archived), |page| {
                    if page.contains(&hit.id) {
                        return false;
                    }
                    page.add(hit.clone(), None);
                    true
                }) > 0
            }
            Action::Delete => {
                self.inner.store.update_at(&Path::root(), |tree| {
                    prune_item(tree, Some(&ctx.item_type), &ctx.id)
                }) > 0
            }
            _ => false,
        }
    }

    fn prune_lists(&self, item_type: &ItemType, id: &str, wanted: impl Fn(Status) -> bool) -> usize {
        self.edit_lists(item_type, wanted, |page| page.remove(id))
    }

    /// Apply `edit` to every cached list of `item_type` whose status passes
    /// `wanted`. Returns how many lists changed.
    fn edit_lists(
        &self,
        item_type: &ItemType,
        wanted: impl Fn(Status) -> bool,
        mut edit: impl FnMut(&mut ResultPage) -> bool,
    ) -> usize {
        self.inner.store.update_at(&Path::lists_of(item_type), |tree| {
            let mut changed = 0;
            for_each_page_mut(tree, &mut |keys, page| {
                let status = keys.first().and_then(|s| s.parse::<Status>().ok());
                if !status.is_some_and(&wanted) {
                    return;
                }
                let Ok(mut parsed) = ResultPage::from_value(page.clone()) else {
                    return;
                };
                if !edit(&mut parsed) {
                    return;
                }
                if let Ok(value) = parsed.to_value() {
                    *page = value;
                    changed += 1;
                }
            });
            changed
        })
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Fetch the first page of a list (deduplicated per list path).
    pub fn list(&self, params: ListParams) -> Cell<ResultPage> {
        let store = &self.inner.store;
        let path = Path::list(&params);
        let url = match self.inner.endpoints.list_endpoint(&params, None) {
            Ok(url) => url,
            Err(err) => return Cell::failed(err),
        };

        let mut options = FetchOptions::new().cache_period(self.inner.settings.list_cache_period);
        if let Some(stale) = store.get(&path) {
            options = options.interim(stale);
        }

        let engine = self.clone();
        let cell = store.fetch(&path, move || async move { engine.fetch_page(url).await }, options);
        derive(&self.inner.pages, &path, cell, |value| {
            ResultPage::from_value(value).map_err(SyncError::from)
        })
    }

    /// Fetch the batch after `page` and merge it into the cached list.
    ///
    /// Asking twice for the same continuation merges it once.
    pub fn more(&self, page: &ResultPage, params: ListParams) -> Cell<ResultPage> {
        let Some(cursor) = page.next.clone() else {
            return Cell::resolved(page.clone());
        };
        if page.consumed_cursors.contains(&cursor) {
            return Cell::resolved(page.clone());
        }

        let url = match self.inner.endpoints.list_endpoint(&params, Some(&cursor)) {
            Ok(url) => url,
            Err(err) => return Cell::failed(err),
        };
        let engine = self.clone();
        let batch = self.inner.store.fetch(
            &Path::more(&params, &cursor),
            move || async move { engine.fetch_page(url).await },
            FetchOptions::new(),
        );

        let store = self.inner.store.clone();
        let base = page.clone();
        batch.then(move |value| async move { merge_batch(&store, &params, base, cursor, value) })
    }

    async fn fetch_page(&self, url: url::Url) -> SyncResult<Value> {
        let response = self.inner.transport.send(&url, SendOptions::get()).await?;
        let cargo = response.into_cargo()?.ok_or_else(|| {
            SyncError::DeserializationFailed(format!("empty list response from {url}"))
        })?;
        Ok(ResultPage::from_value(cargo)?.to_value()?)
    }

    // =========================================================================
    // Local Status and Failures
    // =========================================================================

    fn set_local_status(&self, item_type: &ItemType, id: &str, status: LocalStatus) {
        self.inner.store.set(
            &Path::local_status(item_type, id),
            serde_json::to_value(status).unwrap_or_default(),
        );
    }

    fn settle_clean(&self, item_type: &ItemType, id: &str, action: Action) {
        self.set_local_status(item_type, id, LocalStatus::Clean);
        self.inner
            .store
            .set(&Path::error(item_type, id, action), Value::Null);
    }

    fn record_failure(&self, ctx: &ActionContext, err: &SyncError) {
        warn!(
            item_type = %ctx.item_type,
            id = %ctx.id,
            action = %ctx.action,
            error = %err,
            "Action failed"
        );
        if !ctx.action.is_get_class() {
            self.set_local_status(&ctx.item_type, &ctx.id, LocalStatus::SaveError);
        }
        let message = err.display_message();
        self.inner.store.set(
            &Path::error(&ctx.item_type, &ctx.id, ctx.action),
            Value::String(message.clone()),
        );
        if !ctx.swallow {
            self.inner.notifier.notify(Notice::error(message));
        }
    }

    async fn on_failure(&self, ctx: &ActionContext, err: &SyncError, lists_mutated: bool) {
        self.record_failure(ctx, err);

        if lists_mutated {
            self.inner.store.invalidate(&Path::lists_of(&ctx.item_type));
        }

        if err.is_unauthorized() {
            info!("Server rejected the session, re-validating");
            if let Err(e) = self.inner.session.revalidate().await {
                warn!(error = %e, "Session re-validation failed");
                self.inner.notifier.notify(Notice::warning(
                    "Could not confirm your login. Please sign in again.",
                ));
            }
        }
    }
}

/// Fold one continuation batch into the list cached for `params`, falling
/// back to `base` when the store holds no page there.
fn merge_batch(
    store: &Store,
    params: &ListParams,
    base: ResultPage,
    cursor: String,
    value: Value,
) -> SyncResult<ResultPage> {
    let mut batch = ResultPage::from_value(value)?;
    batch.after.get_or_insert(cursor);

    store.update_at(&Path::list(params), |slot| -> SyncResult<ResultPage> {
        let mut merged = if is_page(slot) {
            ResultPage::from_value(slot.clone())?
        } else {
            base
        };
        if merged.extend(batch) {
            *slot = merged.to_value()?;
        }
        Ok(merged)
    })
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    store: Store,
    transport: Option<Arc<dyn Transport>>,
    endpoints: Option<Arc<dyn EndpointResolver>>,
    local: Option<Arc<dyn LocalStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    session: Option<Arc<dyn SessionGuard>>,
    policy: MergePolicy,
    settings: EngineSettings,
}

impl SyncEngineBuilder {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            transport: None,
            endpoints: None,
            local: None,
            notifier: None,
            session: None,
            policy: MergePolicy::default(),
            settings: EngineSettings::default(),
        }
    }

    /// HTTP transport, REST endpoints, merge policy and cache settings from
    /// `config`. Local store, notifier and session guard stay at their
    /// defaults until set.
    pub fn from_config(store: Store, config: &PortalConfig) -> SyncResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(TransportConfig::from(&config.api))?;
        let endpoints = RestEndpoints::new(&config.api.base_url)?;
        Ok(Self::new(store)
            .with_transport(Arc::new(transport))
            .with_endpoints(Arc::new(endpoints))
            .with_merge_policy(config.merge.clone())
            .with_settings(EngineSettings::from(config)))
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Arc<dyn EndpointResolver>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_session_guard(mut self, session: Arc<dyn SessionGuard>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SyncResult<SyncEngine> {
        let transport = self
            .transport
            .ok_or_else(|| SyncError::InvalidConfig("transport is required".into()))?;
        let endpoints = self
            .endpoints
            .ok_or_else(|| SyncError::InvalidConfig("endpoint resolver is required".into()))?;

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                transport,
                endpoints,
                local: self.local.unwrap_or_else(|| Arc::new(NoLocalStore)),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(NoOpNotifier)),
                session: self.session.unwrap_or_else(|| Arc::new(NoSessionGuard)),
                policy: self.policy,
                settings: self.settings,
                items: Mutex::default(),
                pages: Mutex::default(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_statuses() {
        let ctx = ActionContext::new(
            RunRequest::new(ItemType::Advert, "x7", Action::Publish),
            &EngineSettings {
                domain: Some("acme.org".into()),
                ..Default::default()
            },
        );
        assert_eq!(ctx.start.status, Status::Draft);
        assert_eq!(ctx.server.status, Status::Published);
        assert_eq!(ctx.server.domain.as_deref(), Some("acme.org"));

        let ctx = ActionContext::new(
            RunRequest::new(ItemType::Advert, "x7", Action::Get).domain("other.org"),
            &EngineSettings::default(),
        );
        assert_eq!(ctx.domain.as_deref(), Some("other.org"));
    }

    #[test]
    fn test_normalize_fills_envelope() {
        let value = normalize(serde_json::json!({"id": "x7"}), &ItemType::Advert);
        assert_eq!(value, serde_json::json!({"@type": "Advert", "id": "x7"}));

        let junk = serde_json::json!("not an item");
        assert_eq!(normalize(junk.clone(), &ItemType::Advert), junk);
    }

    #[test]
    fn test_builder_requires_transport() {
        let err = SyncEngine::builder(Store::new()).build().unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_builder_from_config() {
        let config = PortalConfig::default();
        let engine = SyncEngineBuilder::from_config(Store::new(), &config)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            engine.inner.settings.list_cache_period,
            Some(Duration::from_secs(300))
        );
    }
}
