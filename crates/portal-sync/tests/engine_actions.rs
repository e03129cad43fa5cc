mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::{
    advert_list, harness, harness_with, hit_ids, item_path, page_json, CountingSession,
};
use portal_core::{Action, ItemKey, ItemType, ListParams, LocalStatus, Path, Status};
use portal_sync::{
    Cell, LocalStore, MemoryLocalStore, Method, NoticeLevel, Response, RunRequest, SyncError,
};

fn advert(id: &str, fields: Value) -> Value {
    let mut value = json!({"@type": "Advert", "id": id});
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), fields) {
        map.extend(extra);
    }
    value
}

fn run(action: Action, id: &str) -> RunRequest {
    RunRequest::new(ItemType::Advert, id, action)
}

// =============================================================================
// Save
// =============================================================================

#[tokio::test]
async fn test_edits_during_save_survive_server_reply() {
    let h = harness();
    let draft = item_path(Status::Draft, "x7");
    h.store.set(&draft, advert("x7", json!({"name": "Spring", "budget": 10})));

    let gate = h.transport.gate();
    let cell = h.engine.run(run(Action::Save, "x7"));
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::Saving
    );

    let key = ItemKey::new(ItemType::Advert, "x7", Status::Draft);
    h.engine.set_value(&key, &["name"], json!("Summer")).unwrap();

    gate.send(Ok(Response::ok(advert(
        "x7",
        json!({"name": "Spring", "budget": 10, "lastModified": "2026-10-19"}),
    ))))
    .unwrap();
    let saved = cell.settled().await.unwrap();

    assert_eq!(saved.field("name"), Some(&json!("Summer")));
    let stored = h.store.get(&draft).unwrap();
    assert_eq!(stored["name"], "Summer");
    assert_eq!(stored["lastModified"], "2026-10-19");
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::Clean
    );

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].options.method, Method::Put);
    let body = calls[0].options.body.as_ref().unwrap();
    assert_eq!(body.item.as_ref().unwrap()["name"], "Spring");
    assert!(body.diff.is_none());
}

#[tokio::test]
async fn test_unchanged_save_skips_network() {
    let h = harness();
    let item = json!({"id": "x7", "name": "Spring"});

    let cell = h
        .engine
        .run(run(Action::Save, "x7").item(item.clone()).previous(item));

    assert!(cell.is_resolved());
    assert_eq!(cell.value().unwrap().id, "x7");
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::Clean
    );
}

#[tokio::test]
async fn test_save_with_previous_sends_diff() {
    let h = harness();
    h.transport
        .reply_ok(advert("x7", json!({"name": "Summer"})));

    let saved = h
        .engine
        .run(
            run(Action::Save, "x7")
                .item(json!({"id": "x7", "name": "Summer"}))
                .previous(json!({"id": "x7", "name": "Spring"})),
        )
        .settled()
        .await
        .unwrap();
    assert_eq!(saved.field("name"), Some(&json!("Summer")));

    let calls = h.transport.calls();
    let body = calls[0].options.body.as_ref().unwrap();
    assert!(body.item.is_none());
    let diff = body.diff.as_ref().unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].path, "/name");
}

#[tokio::test]
async fn test_supplied_item_replaces_cached_draft() {
    let h = harness();
    let draft = item_path(Status::Draft, "x7");
    h.store.set(&draft, advert("x7", json!({"name": "Spring"})));
    h.transport.reply_ok(advert("x7", json!({"name": "Summer"})));

    let saved = h
        .engine
        .run(run(Action::Save, "x7").item(advert("x7", json!({"name": "Summer"}))))
        .settled()
        .await
        .unwrap();

    assert_eq!(saved.field("name"), Some(&json!("Summer")));
    assert_eq!(h.store.get(&draft).unwrap()["name"], "Summer");
    let body = h.transport.calls()[0].options.body.clone().unwrap();
    assert_eq!(body.item.unwrap()["name"], "Summer");
}

#[tokio::test]
async fn test_discard_edits_restores_server_draft() {
    let h = harness();
    let draft = item_path(Status::Draft, "x7");
    h.store.set(&draft, advert("x7", json!({"name": "Half typed"})));
    h.transport.reply_ok(advert("x7", json!({"name": "Spring"})));

    let restored = h
        .engine
        .run(run(Action::DiscardEdits, "x7"))
        .settled()
        .await
        .unwrap();

    assert_eq!(restored.field("name"), Some(&json!("Spring")));
    assert_eq!(h.store.get(&draft).unwrap()["name"], "Spring");
    let call = &h.transport.calls()[0];
    assert_eq!(call.options.method, Method::Put);
    assert_eq!(call.url.query(), Some("status=DRAFT"));
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::Clean
    );
}

#[tokio::test]
async fn test_copy_lands_under_new_id() {
    let h = harness();
    let source = item_path(Status::Draft, "x7");
    h.store.set(&source, advert("x7", json!({"name": "Spring"})));
    h.transport
        .reply_ok(advert("c9", json!({"name": "Spring (copy)"})));

    let copy = h
        .engine
        .run(run(Action::Copy, "x7"))
        .settled()
        .await
        .unwrap();

    assert_eq!(copy.id, "c9");
    assert_eq!(h.store.get(&source).unwrap()["name"], "Spring");
    assert_eq!(
        h.store.get(&item_path(Status::Draft, "c9")).unwrap()["name"],
        "Spring (copy)"
    );
    assert_eq!(
        h.store.get(&Path::focus(&ItemType::Advert)),
        Some(json!("c9"))
    );
    assert_eq!(h.transport.calls()[0].options.method, Method::Post);
}

#[tokio::test]
async fn test_save_without_item_fails_fast() {
    let h = harness();

    let err = h
        .engine
        .run(run(Action::Save, "ghost"))
        .settled()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MissingItem { .. }));
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn test_invalid_id_is_rejected_before_sending() {
    let h = harness();

    let cell = h.engine.run(run(Action::Get, " "));

    assert!(matches!(cell.error(), Some(SyncError::Validation(_))));
    assert_eq!(h.transport.call_count(), 0);
    assert!(h
        .engine
        .error_message(&ItemType::Advert, " ", Action::Get)
        .is_some());
}

// =============================================================================
// Publish / Delete
// =============================================================================

#[tokio::test]
async fn test_publish_updates_both_copies_and_lists() {
    let local = Arc::new(MemoryLocalStore::new());
    let h = harness_with(
        CountingSession::accepting(),
        Some(local.clone() as Arc<dyn LocalStore>),
    );
    let published_list = Path::list(&advert_list(Status::Published));
    let draft_list = Path::list(&advert_list(Status::Draft));
    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({"vertiser": "acme"})));
    h.store.set(&published_list, page_json(&["k1"], None));
    h.store.set(&draft_list, page_json(&["k1"], None));

    let gate = h.transport.gate();
    let cell = h.engine.run(run(Action::Publish, "x7"));

    // lists move before the server answers
    assert_eq!(
        hit_ids(&h.store.get(&published_list).unwrap()),
        vec!["x7", "k1"]
    );
    assert_eq!(hit_ids(&h.store.get(&draft_list).unwrap()), vec!["k1"]);

    gate.send(Ok(Response::ok(advert(
        "x7",
        json!({"vertiser": "acme", "status": "PUBLISHED"}),
    ))))
    .unwrap();
    cell.settled().await.unwrap();

    let draft = h.store.get(&item_path(Status::Draft, "x7")).unwrap();
    let published = h.store.get(&item_path(Status::Published, "x7")).unwrap();
    assert_eq!(draft["vertiser"], "acme");
    assert_eq!(published["vertiser"], "acme");
    assert_eq!(published["status"], "PUBLISHED");

    let page = h.store.get(&published_list).unwrap();
    assert_eq!(hit_ids(&page), vec!["x7", "k1"]);
    assert_eq!(page["total"], 2);

    let persisted = local.load(&item_path(Status::Published, "x7")).await.unwrap();
    assert_eq!(persisted.unwrap()["vertiser"], "acme");

    let call = &h.transport.calls()[0];
    assert_eq!(call.url.path(), "/advert/x7.json");
    assert_eq!(call.url.query(), Some("status=PUBLISHED"));
}

#[tokio::test]
async fn test_archive_keeps_published_copy() {
    let h = harness();
    let published = item_path(Status::Published, "x7");
    let archived = item_path(Status::Archived, "x7");
    let archived_list = Path::list(&advert_list(Status::Archived));
    let published_list = Path::list(&advert_list(Status::Published));
    h.store.set(
        &published,
        advert("x7", json!({"name": "Spring", "status": "PUBLISHED"})),
    );
    h.store.set(&archived_list, page_json(&["k1"], None));
    h.store.set(&published_list, page_json(&["k1"], None));

    let gate = h.transport.gate();
    let cell = h.engine.run(run(Action::Archive, "x7"));
    assert_eq!(
        hit_ids(&h.store.get(&archived_list).unwrap()),
        vec!["k1", "x7"]
    );
    assert_eq!(hit_ids(&h.store.get(&published_list).unwrap()), vec!["k1"]);

    gate.send(Ok(Response::ok(advert(
        "x7",
        json!({"name": "Spring", "status": "ARCHIVED"}),
    ))))
    .unwrap();
    let item = cell.settled().await.unwrap();

    assert_eq!(item.status, Some(Status::Archived));
    assert_eq!(h.store.get(&published).unwrap()["status"], "PUBLISHED");
    assert_eq!(h.store.get(&archived).unwrap()["status"], "ARCHIVED");
    let call = &h.transport.calls()[0];
    assert_eq!(call.options.method, Method::Put);
    assert_eq!(call.url.query(), Some("status=ARCHIVED"));
}

#[tokio::test]
async fn test_unpublish_moves_item_back_to_draft() {
    let local = Arc::new(MemoryLocalStore::new());
    let h = harness_with(
        CountingSession::accepting(),
        Some(local.clone() as Arc<dyn LocalStore>),
    );
    let published = item_path(Status::Published, "x7");
    let draft = item_path(Status::Draft, "x7");
    let published_list = Path::list(&advert_list(Status::Published));
    let mixed_list = Path::list(&advert_list(Status::PubOrDraft));
    let live = advert("x7", json!({"name": "Spring", "status": "PUBLISHED"}));
    h.store.set(&published, live.clone());
    local.save(&published, &live).await.unwrap();
    h.store.set(&published_list, page_json(&["x7", "k1"], None));
    h.store.set(&mixed_list, page_json(&["x7", "k1"], None));
    h.transport
        .reply_ok(advert("x7", json!({"name": "Spring", "status": "DRAFT"})));

    let item = h
        .engine
        .run(run(Action::Unpublish, "x7"))
        .settled()
        .await
        .unwrap();

    assert_eq!(item.status, Some(Status::Draft));
    assert_eq!(h.store.get(&published), None);
    assert_eq!(h.store.get(&draft).unwrap()["status"], "DRAFT");
    assert_eq!(hit_ids(&h.store.get(&published_list).unwrap()), vec!["k1"]);
    assert_eq!(
        hit_ids(&h.store.get(&mixed_list).unwrap()),
        vec!["x7", "k1"]
    );
    assert_eq!(local.load(&published).await.unwrap(), None);
    let call = &h.transport.calls()[0];
    assert_eq!(call.options.method, Method::Put);
    assert_eq!(call.url.query(), Some("status=DRAFT"));
}

#[tokio::test]
async fn test_export_refreshes_published_copy() {
    let h = harness();
    let published = item_path(Status::Published, "x7");
    h.store.set(&published, advert("x7", json!({"name": "Spring"})));
    h.transport
        .reply_ok(advert("x7", json!({"name": "Spring", "exportedAt": "2026-10-19"})));

    let item = h
        .engine
        .run(run(Action::Export, "x7"))
        .settled()
        .await
        .unwrap();

    assert_eq!(item.field("exportedAt"), Some(&json!("2026-10-19")));
    assert_eq!(h.store.get(&published).unwrap()["exportedAt"], "2026-10-19");
    let call = &h.transport.calls()[0];
    assert_eq!(call.options.method, Method::Get);
    assert_eq!(call.url.query(), Some("status=PUBLISHED"));
}

#[tokio::test]
async fn test_failed_publish_invalidates_lists() {
    let h = harness();
    let params = advert_list(Status::Published);
    let published_list = Path::list(&params);

    h.transport.reply_ok(page_json(&["k1"], None));
    h.engine.list(params).settled().await.unwrap();

    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({})));
    h.transport.reply(Err(SyncError::Http {
        status: 500,
        message: "boom".into(),
    }));

    let err = h
        .engine
        .run(run(Action::Publish, "x7"))
        .settled()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 500, .. }));
    assert!(h.store.cell(&published_list).is_none());
    assert_eq!(h.store.get(&published_list), None);
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::SaveError
    );
    assert!(h
        .engine
        .error_message(&ItemType::Advert, "x7", Action::Publish)
        .is_some());
    assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn test_delete_prunes_every_cached_list() {
    let h = harness();
    let lists: Vec<Path> = [Status::Published, Status::Draft, Status::PubOrDraft]
        .into_iter()
        .map(|status| Path::list(&advert_list(status)))
        .collect();
    let campaigns = Path::list(&ListParams::new(ItemType::Campaign, Status::Published));

    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({})));
    h.store
        .set(&item_path(Status::Published, "x7"), advert("x7", json!({})));
    for list in &lists {
        h.store.set(list, page_json(&["x7", "k1"], None));
    }
    h.store.set(
        &campaigns,
        json!({"hits": [{"@type": "Campaign", "id": "x7"}], "total": 1}),
    );

    let gate = h.transport.gate();
    let cell = h.engine.run(run(Action::Delete, "x7"));
    for list in &lists {
        assert_eq!(hit_ids(&h.store.get(list).unwrap()), vec!["k1"]);
    }

    gate.send(Ok(Response::ok(Value::Null))).unwrap();
    cell.settled().await.unwrap();

    assert_eq!(h.store.get(&item_path(Status::Draft, "x7")), None);
    assert_eq!(h.store.get(&item_path(Status::Published, "x7")), None);
    for list in &lists {
        let page = h.store.get(list).unwrap();
        assert_eq!(hit_ids(&page), vec!["k1"]);
        assert_eq!(page["total"], 1);
    }
    assert_eq!(hit_ids(&h.store.get(&campaigns).unwrap()), vec!["x7"]);
    assert_eq!(h.transport.calls()[0].options.method, Method::Delete);
}

#[tokio::test]
async fn test_new_item_adopts_server_id() {
    let h = harness();
    h.transport
        .reply_ok(advert("a1", json!({"name": "Fresh"})));

    let created = h
        .engine
        .run(run(Action::New, "new").item(json!({"id": "new", "name": "Fresh"})))
        .settled()
        .await
        .unwrap();

    assert_eq!(created.id, "a1");
    assert_eq!(
        h.store.get(&Path::focus(&ItemType::Advert)),
        Some(json!("a1"))
    );
    assert_eq!(
        h.store.get(&item_path(Status::Draft, "a1")).unwrap()["name"],
        "Fresh"
    );
    assert_eq!(h.store.get(&item_path(Status::Draft, "new")), None);
    assert_eq!(h.transport.calls()[0].options.method, Method::Post);
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn test_swallowed_failure_is_recorded_quietly() {
    let h = harness();
    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({})));
    h.transport.reply(Ok(Response::rejected(["Name is required"])));

    let err = h
        .engine
        .run(run(Action::Save, "x7").swallow())
        .settled()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Rejected { .. }));
    assert!(h.notifier.notices().is_empty());
    assert_eq!(
        h.engine.error_message(&ItemType::Advert, "x7", Action::Save),
        Some("Name is required".to_string())
    );
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::SaveError
    );
}

#[tokio::test]
async fn test_unauthorized_revalidates_session() {
    let h = harness();
    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({})));
    h.transport.reply(Err(SyncError::Unauthorized));

    let err = h
        .engine
        .run(run(Action::Save, "x7"))
        .settled()
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(h.session.calls(), 1);
    assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    assert_eq!(h.notifier.count(NoticeLevel::Warning), 0);
}

#[tokio::test]
async fn test_rejected_session_warns_even_when_swallowed() {
    let h = harness_with(CountingSession::rejecting(), None);
    h.store
        .set(&item_path(Status::Draft, "x7"), advert("x7", json!({})));
    h.transport.reply(Err(SyncError::Unauthorized));

    let _ = h
        .engine
        .run(run(Action::Save, "x7").swallow())
        .settled()
        .await;

    assert_eq!(h.session.calls(), 1);
    assert_eq!(h.notifier.count(NoticeLevel::Error), 0);
    assert_eq!(h.notifier.count(NoticeLevel::Warning), 1);
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_concurrent_gets_share_one_request() {
    let h = harness();
    h.transport
        .reply_ok(advert("x7", json!({"name": "Live"})));

    let first = h.engine.run(run(Action::Get, "x7"));
    let second = h.engine.run(run(Action::Get, "x7"));
    let (a, b) = futures_util::future::join(first.settled(), second.settled()).await;

    assert_eq!(a.unwrap().field("name"), Some(&json!("Live")));
    assert_eq!(b.unwrap().field("name"), Some(&json!("Live")));
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.transport.calls()[0].options.method, Method::Get);
}

#[tokio::test]
async fn test_local_copy_served_then_refreshed() {
    let local = Arc::new(MemoryLocalStore::new());
    local
        .save(
            &item_path(Status::Published, "x7"),
            &advert("x7", json!({"name": "Cached"})),
        )
        .await
        .unwrap();
    let h = harness_with(
        CountingSession::accepting(),
        Some(local.clone() as Arc<dyn LocalStore>),
    );
    let gate = h.transport.gate();

    let item = h
        .engine
        .run(run(Action::Get, "x7"))
        .settled()
        .await
        .unwrap();
    assert_eq!(item.field("name"), Some(&json!("Cached")));

    gate.send(Ok(Response::ok(advert("x7", json!({"name": "Fresh"})))))
        .unwrap();
    let published = item_path(Status::Published, "x7");
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.get(&published).map(|v| v["name"].clone()) != Some(json!("Fresh")) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let persisted = local.load(&published).await.unwrap().unwrap();
    assert_eq!(persisted["name"], "Fresh");
}

#[tokio::test]
async fn test_repeated_gets_share_one_cell() {
    let h = harness();
    h.transport
        .reply_ok(advert("x7", json!({"name": "Live"})));

    let first = h.engine.run(run(Action::Get, "x7"));
    let second = h.engine.run(run(Action::Get, "x7"));
    assert!(Cell::ptr_eq(&first, &second));
    first.settled().await.unwrap();

    let settled = h.engine.run(run(Action::Get, "x7"));
    assert!(Cell::ptr_eq(&first, &settled));

    h.store.set(
        &item_path(Status::Published, "x7").child("name"),
        json!("Edited"),
    );
    let edited = h.engine.run(run(Action::Get, "x7"));
    assert!(Cell::ptr_eq(&first, &edited));
    assert_eq!(edited.value().unwrap().field("name"), Some(&json!("Edited")));
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_get_failure_notifies_without_touching_local_status() {
    let h = harness();
    h.transport.reply(Err(SyncError::Http {
        status: 404,
        message: "not found".into(),
    }));

    let err = h
        .engine
        .run(run(Action::Get, "x7"))
        .settled()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 404, .. }));
    assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    assert_eq!(
        h.engine.local_status(&ItemType::Advert, "x7"),
        LocalStatus::Clean
    );
}

// =============================================================================
// Lists
// =============================================================================

#[tokio::test]
async fn test_more_merges_each_cursor_once() {
    let h = harness();
    let params = advert_list(Status::Published);

    h.transport.reply_ok(page_json(&["a", "b"], Some("c2")));
    let first = h.engine.list(params.clone()).settled().await.unwrap();
    assert_eq!(first.next.as_deref(), Some("c2"));

    h.transport.reply_ok(page_json(&["c"], None));
    let merged = h
        .engine
        .more(&first, params.clone())
        .settled()
        .await
        .unwrap();
    let ids: Vec<&str> = merged.hits.iter().map(|hit| hit.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(merged.next, None);

    let again = h
        .engine
        .more(&first, params.clone())
        .settled()
        .await
        .unwrap();
    assert_eq!(again.hits.len(), 3);
    assert_eq!(h.transport.call_count(), 2);

    let stored = h.store.get(&Path::list(&params)).unwrap();
    assert_eq!(hit_ids(&stored), vec!["a", "b", "c"]);

    let continuation = &h.transport.calls()[1].url;
    assert!(continuation
        .query_pairs()
        .any(|(k, v)| k == "after" && v == "c2"));

    // last page: nothing left to fetch
    let done = h.engine.more(&merged, params).settled().await.unwrap();
    assert_eq!(done.hits.len(), 3);
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test]
async fn test_list_is_cached() {
    let h = harness();
    let params = advert_list(Status::PubOrDraft);
    h.transport.reply_ok(page_json(&["a"], None));

    let first = h.engine.list(params.clone());
    let pending = h.engine.list(params.clone());
    assert!(Cell::ptr_eq(&first, &pending));
    first.settled().await.unwrap();

    let again = h.engine.list(params);
    assert!(Cell::ptr_eq(&first, &again));
    assert_eq!(again.settled().await.unwrap().hits.len(), 1);
    assert_eq!(h.transport.call_count(), 1);
}
