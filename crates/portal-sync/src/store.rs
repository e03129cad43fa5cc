//! # Store
//!
//! Path-addressable cache shared by the sync engine and the UI.
//!
//! ## Structure
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Store                                      │
//! │                                                                         │
//! │  data tree (JSON)               cells (one per fetched path)           │
//! │  ┌──────────────────────┐       ┌──────────────────────────────────┐   │
//! │  │ data.DRAFT.Advert.x7 │◄──────│ data.PUBLISHED.Advert.x7 → Cell  │   │
//! │  │ list.Advert....      │ land  │ list.Advert.PUBLISHED... → Cell  │   │
//! │  │ location.params.q    │       └──────────────────────────────────┘   │
//! │  └──────────┬───────────┘                                               │
//! │             │ set / update_at                                           │
//! │             ▼                                                           │
//! │  revision (watch)  ── coalesced: many writes per tick, one bump ──►    │
//! │                                                                         │
//! │  location.params.* ◄──── two-way ────► current URL query string        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fetch deduplication
//!
//! [`Store::fetch`] keeps at most one cell per path. While that cell is
//! pending, or settled and still inside its cache period, every caller gets
//! the same cell back and the producer is not called again. A failure is
//! cached like a value; [`Store::invalidate`] is how callers retry.
//!
//! Locks are plain `std` locks held for short, non-async sections. When both
//! are needed, `cells` is taken before `data`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use portal_core::Path;

use crate::cell::Cell;
use crate::error::SyncResult;

// =============================================================================
// Fetch Options
// =============================================================================

/// Options for [`Store::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// How long a settled cell is reused. `None` keeps it until invalidated.
    pub cache_period: Option<Duration>,

    /// Value shown while the producer runs.
    pub interim: Option<Value>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_period(mut self, period: Option<Duration>) -> Self {
        self.cache_period = period;
        self
    }

    pub fn interim(mut self, interim: Value) -> Self {
        self.interim = Some(interim);
        self
    }
}

struct CellEntry {
    cell: Cell<Value>,
    fetched_at: Instant,
    cache_period: Option<Duration>,
}

impl CellEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        if self.cell.is_pending() {
            return true;
        }
        match self.cache_period {
            Some(period) => now.duration_since(self.fetched_at) < period,
            None => true,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

struct StoreInner {
    data: RwLock<Value>,
    cells: Mutex<HashMap<Path, CellEntry>>,
    revision: watch::Sender<u64>,
    update_scheduled: AtomicBool,
    location: Mutex<Option<Url>>,
}

/// Shared cache context. Clones are handles to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("revision", &self.revision())
            .field("cells", &self.lock_cells().len())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(Value::Object(Map::new())),
                cells: Mutex::new(HashMap::new()),
                revision,
                update_scheduled: AtomicBool::new(false),
                location: Mutex::new(None),
            }),
        }
    }

    /// A store whose `location.params` subtree starts from `url`.
    pub fn with_location(self, url: Url) -> Self {
        self.navigate(url);
        self
    }

    fn read_data(&self) -> RwLockReadGuard<'_, Value> {
        self.inner
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, Value> {
        self.inner
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cells(&self) -> MutexGuard<'_, HashMap<Path, CellEntry>> {
        self.inner
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_location(&self) -> MutexGuard<'_, Option<Url>> {
        self.inner
            .location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Get / Set
    // =========================================================================

    /// Read the value at `path`. Null counts as absent.
    pub fn get(&self, path: &Path) -> Option<Value> {
        let data = self.read_data();
        value_at(&data, path.segments())
            .filter(|value| !value.is_null())
            .cloned()
    }

    /// Write `value` at `path` and schedule a change notification.
    pub fn set(&self, path: &Path, value: Value) {
        self.set_with(path, value, true);
    }

    /// Write `value` at `path`, notifying only when `notify` is set.
    pub fn set_with(&self, path: &Path, value: Value, notify: bool) {
        self.modify(path, notify, true, |slot| *slot = value);
    }

    /// Edit the value at `path` in place (a missing slot reads as null).
    pub fn update_at<R>(&self, path: &Path, f: impl FnOnce(&mut Value) -> R) -> R {
        self.modify(path, true, true, f)
    }

    fn modify<R>(
        &self,
        path: &Path,
        notify: bool,
        mirror: bool,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        let result = {
            let cells = self.lock_cells();
            let mut data = self.write_data();
            let result = f(slot_mut(&mut data, path.segments()));

            // every holder of a settled cell over this subtree sees the write
            for (cell_path, entry) in cells.iter() {
                if cell_path.overlaps(path) && entry.cell.is_resolved() {
                    let fresh = value_at(&data, cell_path.segments())
                        .cloned()
                        .unwrap_or(Value::Null);
                    entry.cell.replace(fresh);
                }
            }
            result
        };
        trace!(%path, "Store write");

        if mirror && path.overlaps(&Path::location_params()) {
            self.mirror_params_to_url();
        }
        if notify {
            self.update();
        }
        result
    }

    // =========================================================================
    // Change Notification
    // =========================================================================

    /// Schedule a change signal.
    ///
    /// Calls made before the scheduled signal fires are folded into it.
    /// Outside a tokio runtime the signal fires immediately.
    pub fn update(&self) {
        if self.inner.update_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.clone();
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    store.flush_update();
                });
            }
            Err(_) => self.flush_update(),
        }
    }

    fn flush_update(&self) {
        self.inner.update_scheduled.store(false, Ordering::Release);
        self.inner.revision.send_modify(|rev| *rev += 1);
        trace!(revision = self.revision(), "Store update signalled");
    }

    /// Receiver that changes once per coalesced update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Deduplicated load of `path`.
    ///
    /// Returns the existing cell when one is pending or still fresh.
    /// Otherwise calls `producer` once, and when its future resolves writes
    /// the value at `path` and resolves the cell. Must be called inside a
    /// tokio runtime.
    pub fn fetch<F, Fut>(&self, path: &Path, producer: F, options: FetchOptions) -> Cell<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        let cell = {
            let mut cells = self.lock_cells();
            let now = Instant::now();
            if let Some(entry) = cells.get(path) {
                if entry.is_fresh(now) {
                    debug!(%path, "Fetch served from cache");
                    return entry.cell.clone();
                }
            }
            let cell = Cell::pending(options.interim);
            cells.insert(
                path.clone(),
                CellEntry {
                    cell: cell.clone(),
                    fetched_at: now,
                    cache_period: options.cache_period,
                },
            );
            cell
        };

        debug!(%path, "Fetch started");
        let fut = producer();
        let store = self.clone();
        let path = path.clone();
        cell.drive(async move {
            let value = fut.await?;
            store.set(&path, value.clone());
            Ok(value)
        });
        cell
    }

    /// The cell currently cached for `path`, if any.
    pub fn cell(&self, path: &Path) -> Option<Cell<Value>> {
        self.lock_cells().get(path).map(|entry| entry.cell.clone())
    }

    /// Drop every cached cell under `prefix`, along with its stored value.
    ///
    /// Returns how many cells were dropped.
    pub fn invalidate(&self, prefix: &Path) -> usize {
        let dropped: Vec<Path> = {
            let mut cells = self.lock_cells();
            let doomed: Vec<Path> = cells
                .keys()
                .filter(|path| path.starts_with(prefix))
                .cloned()
                .collect();
            let mut data = self.write_data();
            for path in &doomed {
                cells.remove(path);
                remove_at(&mut data, path.segments());
            }
            doomed
        };

        if !dropped.is_empty() {
            debug!(%prefix, count = dropped.len(), "Invalidated cached paths");
            self.update();
        }
        dropped.len()
    }

    // =========================================================================
    // URL Mirroring
    // =========================================================================

    /// The current URL, with `location.params` folded into its query.
    pub fn location(&self) -> Option<Url> {
        self.lock_location().clone()
    }

    /// Adopt `url` and rewrite `location.params` from its query string.
    pub fn navigate(&self, url: Url) {
        let params: Map<String, Value> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        debug!(%url, params = params.len(), "Navigated");
        *self.lock_location() = Some(url);
        self.modify(&Path::location_params(), true, false, |slot| {
            *slot = Value::Object(params)
        });
    }

    fn mirror_params_to_url(&self) {
        let params = self.get(&Path::location_params());
        let mut location = self.lock_location();
        let Some(url) = location.as_mut() else {
            return;
        };

        let pairs: Vec<(String, String)> = match params {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(key, value)| param_text(value).map(|text| (key, text)))
                .collect(),
            _ => Vec::new(),
        };

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }
}

fn param_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

// =============================================================================
// Tree Helpers
// =============================================================================

fn value_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Walk to `segments`, creating objects on the way.
fn slot_mut<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Value {
    let mut node = root;
    for key in segments {
        let index = match &*node {
            Value::Array(items) => key.parse::<usize>().ok().filter(|i| *i < items.len()),
            _ => None,
        };
        node = match index {
            Some(i) => &mut node[i],
            None => {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                &mut node[key.as_str()]
            }
        };
    }
    node
}

fn remove_at(root: &mut Value, segments: &[String]) {
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Object(Map::new());
        return;
    };
    let mut node = root;
    for key in parents {
        node = match node {
            Value::Object(map) => match map.get_mut(key) {
                Some(child) => child,
                None => return,
            },
            _ => return,
        };
    }
    if let Value::Object(map) = node {
        map.remove(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> Path {
        Path::new(segments.iter().copied())
    }

    #[test]
    fn test_get_set_nested() {
        let store = Store::new();
        store.set(&path(&["a", "b", "c"]), json!(1));
        assert_eq!(store.get(&path(&["a", "b", "c"])), Some(json!(1)));
        assert_eq!(store.get(&path(&["a", "b"])), Some(json!({"c": 1})));
        assert_eq!(store.get(&path(&["a", "x"])), None);

        store.set(&path(&["a", "b", "c"]), Value::Null);
        assert_eq!(store.get(&path(&["a", "b", "c"])), None);
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let store = Store::new();
        store.set(&path(&["a"]), json!(5));
        store.set(&path(&["a", "b"]), json!("x"));
        assert_eq!(store.get(&path(&["a"])), Some(json!({"b": "x"})));
    }

    #[test]
    fn test_array_indices_are_addressable() {
        let store = Store::new();
        store.set(&path(&["list"]), json!([{"n": 1}, {"n": 2}]));
        store.set(&path(&["list", "1", "n"]), json!(3));
        assert_eq!(store.get(&path(&["list"])), Some(json!([{"n": 1}, {"n": 3}])));
    }

    #[test]
    fn test_update_without_runtime_is_immediate() {
        let store = Store::new();
        store.set(&path(&["a"]), json!(1));
        store.set(&path(&["b"]), json!(2));
        assert_eq!(store.revision(), 2);
        store.set_with(&path(&["c"]), json!(3), false);
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_update_at_edits_in_place() {
        let store = Store::new();
        store.set(&path(&["n"]), json!(1));
        let old = store.update_at(&path(&["n"]), |slot| {
            let old = slot.as_i64().unwrap_or(0);
            *slot = json!(old + 1);
            old
        });
        assert_eq!(old, 1);
        assert_eq!(store.get(&path(&["n"])), Some(json!(2)));
    }

    #[test]
    fn test_location_params_round_trip() {
        let url = Url::parse("https://portal.test/adverts?q=vert%3Aacme&page=2").unwrap();
        let store = Store::new().with_location(url);
        assert_eq!(
            store.get(&Path::location_params().child("q")),
            Some(json!("vert:acme"))
        );

        store.set(&Path::location_params().child("page"), json!(3));
        store.set(&Path::location_params().child("q"), Value::Null);
        let location = store.location().unwrap();
        assert_eq!(location.query(), Some("page=3"));
        assert_eq!(location.path(), "/adverts");
    }

    #[test]
    fn test_params_without_location_stay_local() {
        let store = Store::new();
        store.set(&Path::location_params().child("tab"), json!("stats"));
        assert!(store.location().is_none());
        assert_eq!(
            store.get(&Path::location_params()),
            Some(json!({"tab": "stats"}))
        );
    }
}
