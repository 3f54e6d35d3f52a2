//! End-to-end tests for the soup store: registration, upsert, queries, and cursors.

use serde_json::{Value, json};
use tempfile::tempdir;

use soupstore_core::api::{Order, QuerySpec, QuerySpecPayload, SoupStore};
use soupstore_core::config::StoreConfig;
use soupstore_core::error::{Error, ErrorKind};
use soupstore_core::types::{IndexSpec, IndexType, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn notes_store() -> SoupStore {
    init_tracing();
    let store = SoupStore::open_in_memory().unwrap();
    store
        .create_soup("notes")
        .index("title", IndexType::String)
        .execute()
        .unwrap();
    store
}

fn titles(docs: &[Value]) -> Vec<&str> {
    docs.iter().map(|d| d["title"].as_str().unwrap()).collect()
}

fn strip_reserved(mut doc: Value) -> Value {
    let obj = doc.as_object_mut().unwrap();
    obj.remove(SOUP_ENTRY_ID);
    obj.remove(SOUP_LAST_MODIFIED_DATE);
    doc
}

#[test]
fn test_notes_scenario() {
    let store = notes_store();
    for title in ["a", "b", "c"] {
        store.upsert("notes", json!({"title": title})).execute().unwrap();
    }

    let spec = QuerySpec::range("title", None, None, Order::Ascending, 2);
    assert_eq!(store.count_query("notes", &spec).unwrap(), 3);

    let first = store.open_cursor("notes", spec).unwrap();
    assert_eq!(first.total_pages, 2);
    assert_eq!(first.current_page_index, 0);
    assert_eq!(first.page_size, 2);
    assert_eq!(titles(&first.entries), vec!["a", "b"]);

    let second = store.move_cursor_to_page(first.cursor_id, 1).unwrap();
    assert_eq!(second.current_page_index, 1);
    assert_eq!(titles(&second.entries), vec!["c"]);
}

#[test]
fn test_retrieve_returns_document_plus_identity() {
    let store = notes_store();
    let original = json!({"title": "groceries", "items": ["eggs", "milk"], "meta": {"pinned": true}});
    let stored = store.upsert("notes", original.clone()).execute().unwrap();

    let id = stored[SOUP_ENTRY_ID].as_i64().unwrap();
    assert!(stored[SOUP_LAST_MODIFIED_DATE].as_i64().unwrap() > 0);

    let fetched = store.retrieve("notes", &[id]).unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0], stored);
    assert_eq!(fetched[0][SOUP_ENTRY_ID], json!(id));
    assert_eq!(strip_reserved(fetched[0].clone()), original);
}

#[test]
fn test_ids_are_unique_and_increasing() {
    let store = notes_store();
    let ids: Vec<i64> = (0..5)
        .map(|i| {
            store
                .upsert("notes", json!({"title": format!("t{i}")}))
                .execute()
                .unwrap()[SOUP_ENTRY_ID]
                .as_i64()
                .unwrap()
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    // Deleting the newest row does not make its id reusable.
    store.delete("notes", &[5]).unwrap();
    let next = store.upsert("notes", json!({"title": "t5"})).execute().unwrap();
    assert_eq!(next[SOUP_ENTRY_ID], json!(6));
}

#[test]
fn test_external_id_dedup() {
    let store = notes_store();
    let first = store
        .upsert("notes", json!({"title": "plan", "body": "v1"}))
        .external_id_path("title")
        .execute()
        .unwrap();
    let second = store
        .upsert("notes", json!({"title": "plan", "body": "v2"}))
        .external_id_path("title")
        .execute()
        .unwrap();

    assert_eq!(first[SOUP_ENTRY_ID], second[SOUP_ENTRY_ID]);
    let spec = QuerySpec::exact("title", "plan", 10);
    assert_eq!(store.count_query("notes", &spec).unwrap(), 1);

    let docs = store.query("notes", &spec, 0).unwrap();
    assert_eq!(docs[0]["body"], json!("v2"));
}

#[test]
fn test_upsert_without_external_id_always_inserts() {
    let store = notes_store();
    store.upsert("notes", json!({"title": "same"})).execute().unwrap();
    store.upsert("notes", json!({"title": "same"})).execute().unwrap();
    let spec = QuerySpec::exact("title", "same", 10);
    assert_eq!(store.count_query("notes", &spec).unwrap(), 2);
}

#[test]
fn test_strict_external_id() {
    let store = notes_store();
    let err = store
        .upsert("notes", json!({"body": "untitled"}))
        .external_id_path("title")
        .strict(true)
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
}

#[test]
fn test_pagination_clamping() {
    let store = notes_store();
    for i in 0..7 {
        store
            .upsert("notes", json!({"title": format!("n{i}")}))
            .execute()
            .unwrap();
    }
    let page = store
        .open_cursor("notes", QuerySpec::all("title", Order::Ascending, 3))
        .unwrap();
    assert_eq!(page.total_pages, 7 / 3 + 1);

    let last = page.total_pages as i64 - 1;
    let at_last = store.move_cursor_to_page(page.cursor_id, last).unwrap();
    assert_eq!(at_last.current_page_index, last as u64);
    assert_eq!(titles(&at_last.entries), vec!["n6"]);

    let beyond = store
        .move_cursor_to_page(page.cursor_id, page.total_pages as i64)
        .unwrap();
    assert_eq!(beyond.current_page_index, last as u64);

    let before = store.move_cursor_to_page(page.cursor_id, -1).unwrap();
    assert_eq!(before.current_page_index, 0);
    assert_eq!(titles(&before.entries), vec!["n0", "n1", "n2"]);
}

#[test]
fn test_exact_multiple_keeps_trailing_empty_page() {
    let store = notes_store();
    for i in 0..4 {
        store
            .upsert("notes", json!({"title": format!("n{i}")}))
            .execute()
            .unwrap();
    }
    let page = store
        .open_cursor("notes", QuerySpec::all("title", Order::Ascending, 2))
        .unwrap();
    assert_eq!(page.total_pages, 3);
    let tail = store.move_cursor_to_page(page.cursor_id, 2).unwrap();
    assert!(tail.entries.is_empty());
}

#[test]
fn test_cursor_reflects_live_store() {
    let store = notes_store();
    store.upsert("notes", json!({"title": "b"})).execute().unwrap();
    let page = store
        .open_cursor("notes", QuerySpec::all("title", Order::Ascending, 10))
        .unwrap();
    assert_eq!(titles(&page.entries), vec!["b"]);

    store.upsert("notes", json!({"title": "a"})).execute().unwrap();
    let again = store.move_cursor_to_page(page.cursor_id, 0).unwrap();
    assert_eq!(titles(&again.entries), vec!["a", "b"]);
}

#[test]
fn test_descending_range() {
    let store = notes_store();
    for title in ["a", "b", "c", "d"] {
        store.upsert("notes", json!({"title": title})).execute().unwrap();
    }
    let spec = QuerySpec::range(
        "title",
        Some(json!("b")),
        Some(json!("c")),
        Order::Descending,
        10,
    );
    let docs = store.query("notes", &spec, 0).unwrap();
    assert_eq!(titles(&docs), vec!["c", "b"]);
}

#[test]
fn test_drop_and_reregister_yields_empty_soup() {
    let store = notes_store();
    for title in ["a", "b"] {
        store.upsert("notes", json!({"title": title})).execute().unwrap();
    }
    store.drop_soup("notes").unwrap();
    assert!(!store.has_soup("notes").unwrap());

    store
        .register_soup("notes", &[IndexSpec::new("title", IndexType::String)])
        .unwrap();
    let spec = QuerySpec::all("title", Order::Ascending, 10);
    assert_eq!(store.count_query("notes", &spec).unwrap(), 0);
    assert!(store.retrieve("notes", &[1, 2]).unwrap().is_empty());

    let doc = store.upsert("notes", json!({"title": "fresh"})).execute().unwrap();
    assert_eq!(doc[SOUP_ENTRY_ID], json!(1));
}

#[test]
fn test_drop_unknown_soup_is_noop() {
    let store = notes_store();
    store.drop_soup("ghosts").unwrap();
}

#[test]
fn test_delete_nonexistent_id_is_noop() {
    let store = notes_store();
    store.upsert("notes", json!({"title": "keep"})).execute().unwrap();
    store.delete("notes", &[999]).unwrap();
    store.delete("notes", &[]).unwrap();
    assert_eq!(store.retrieve("notes", &[1]).unwrap().len(), 1);
}

#[test]
fn test_retrieve_many_ids() {
    let store = notes_store();
    let docs: Vec<Value> = (0..1200).map(|i| json!({"title": format!("{i:04}")})).collect();
    store.upsert_many("notes", docs, None).unwrap();

    let ids: Vec<i64> = (1..=1200).collect();
    let fetched = store.retrieve("notes", &ids).unwrap();
    assert_eq!(fetched.len(), 1200);

    store.delete("notes", &ids[..600]).unwrap();
    assert_eq!(store.retrieve("notes", &ids).unwrap().len(), 600);
}

#[test]
fn test_clear_soup_keeps_registration() {
    let store = notes_store();
    store.upsert("notes", json!({"title": "x"})).execute().unwrap();
    store.clear_soup("notes").unwrap();
    assert!(store.has_soup("notes").unwrap());
    let spec = QuerySpec::all("title", Order::Ascending, 10);
    assert_eq!(store.count_query("notes", &spec).unwrap(), 0);
}

#[test]
fn test_unknown_soup_errors_are_not_found() {
    let store = notes_store();
    let spec = QuerySpec::all("title", Order::Ascending, 10);
    let err = store.count_query("ghosts", &spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "soup not found: ghosts");

    let err = store.upsert("ghosts", json!({})).execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_reregister_with_different_specs_conflicts() {
    let store = notes_store();
    let err = store
        .create_soup("notes")
        .index("title", IndexType::String)
        .index("rank", IndexType::Integer)
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn test_arbitrary_soup_names() {
    init_tracing();
    let store = SoupStore::open_in_memory().unwrap();
    let name = "weird \"soup\"; DROP TABLE soup_names; -- ünïcode";
    store
        .create_soup(name)
        .index("k", IndexType::Integer)
        .execute()
        .unwrap();
    store.upsert(name, json!({"k": 5})).execute().unwrap();
    let docs = store
        .query(name, &QuerySpec::exact("k", 5, 10), 0)
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(store.list_soups().unwrap(), vec![name.to_string()]);
}

#[test]
fn test_floating_index_range() {
    init_tracing();
    let store = SoupStore::open_in_memory().unwrap();
    store
        .create_soup("readings")
        .index("sensor.value", IndexType::Floating)
        .execute()
        .unwrap();
    for v in [0.5, 1.25, 2.0, 3.75] {
        store
            .upsert("readings", json!({"sensor": {"value": v}}))
            .execute()
            .unwrap();
    }
    let spec = QuerySpec::range(
        "sensor.value",
        Some(json!(1.0)),
        Some(json!(3.0)),
        Order::Ascending,
        10,
    );
    let docs = store.query("readings", &spec, 0).unwrap();
    let values: Vec<f64> = docs
        .iter()
        .map(|d| d["sensor"]["value"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![1.25, 2.0]);
}

#[test]
fn test_smart_query_join_across_soups() {
    init_tracing();
    let store = SoupStore::open_in_memory().unwrap();
    store
        .create_soup("people")
        .index("id", IndexType::String)
        .index("name", IndexType::String)
        .execute()
        .unwrap();
    store
        .create_soup("notes")
        .index("owner", IndexType::String)
        .index("title", IndexType::String)
        .execute()
        .unwrap();
    store.upsert("people", json!({"id": "p1", "name": "Ana"})).execute().unwrap();
    store.upsert("people", json!({"id": "p2", "name": "Bo"})).execute().unwrap();
    store.upsert("notes", json!({"owner": "p1", "title": "x"})).execute().unwrap();
    store.upsert("notes", json!({"owner": "p1", "title": "y"})).execute().unwrap();
    store.upsert("notes", json!({"owner": "p2", "title": "z"})).execute().unwrap();

    let spec = QuerySpec::smart(
        "SELECT {people:name}, count({notes:title}) FROM {people}, {notes} \
         WHERE {people:id} = {notes:owner} GROUP BY {people:name} ORDER BY {people:name}",
        10,
    );
    let page = store.open_cursor("", spec).unwrap();
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.entries, vec![json!(["Ana", 2]), json!(["Bo", 1])]);
}

#[test]
fn test_smart_query_rejects_writes() {
    let store = notes_store();
    let spec = QuerySpec::smart("DELETE FROM {notes}", 10);
    let err = store.query("", &spec, 0).unwrap_err();
    assert!(matches!(err, Error::Query(_)));
}

#[test]
fn test_query_from_payload() {
    let store = notes_store();
    for title in ["apple", "apricot", "banana"] {
        store.upsert("notes", json!({"title": title})).execute().unwrap();
    }
    let payload: QuerySpecPayload = serde_json::from_value(json!({
        "queryType": "like",
        "indexPath": "title",
        "likeKey": "ap%",
        "order": "descending",
        "pageSize": 5
    }))
    .unwrap();
    let spec = QuerySpec::try_from(payload).unwrap();
    let docs = store.query("notes", &spec, 0).unwrap();
    assert_eq!(titles(&docs), vec!["apricot", "apple"]);
}

#[test]
fn test_evicted_cursor_is_not_found() {
    init_tracing();
    let store = SoupStore::open_with_config(StoreConfig::default().cursor_capacity(2)).unwrap();
    store.register_soup("notes", &[IndexSpec::new("title", IndexType::String)]).unwrap();
    let spec = QuerySpec::all("title", Order::Ascending, 10);

    let a = store.open_cursor("notes", spec.clone()).unwrap();
    let _b = store.open_cursor("notes", spec.clone()).unwrap();
    let _c = store.open_cursor("notes", spec).unwrap();
    assert_eq!(store.open_cursor_count(), 2);

    let err = store.move_cursor_to_page(a.cursor_id, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_close_cursor() {
    let store = notes_store();
    let page = store
        .open_cursor("notes", QuerySpec::all("title", Order::Ascending, 10))
        .unwrap();
    assert!(store.close_cursor(page.cursor_id));
    assert!(!store.close_cursor(page.cursor_id));
    assert_eq!(store.open_cursor_count(), 0);
}

#[test]
fn test_reopened_store_reloads_catalog() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("soups.db");
    {
        let store = SoupStore::create(&path).unwrap();
        store
            .create_soup("notes")
            .index("title", IndexType::String)
            .execute()
            .unwrap();
        for title in ["b", "a"] {
            store.upsert("notes", json!({"title": title})).execute().unwrap();
        }
    }
    let store = SoupStore::open(&path).unwrap();
    let docs = store
        .query("notes", &QuerySpec::all("title", Order::Ascending, 10), 0)
        .unwrap();
    assert_eq!(titles(&docs), vec!["a", "b"]);
    store.destroy().unwrap();
    assert!(!path.exists());
}
