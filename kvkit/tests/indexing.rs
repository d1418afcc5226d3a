mod common;

use common::{FlakyBackend, player_schema};
use kvkit::{
    bson::{Bson, bson, doc},
    memory::MemoryBackend,
    prelude::*,
};

async fn setup() -> (MemoryBackend, Collection) {
    let backend = MemoryBackend::new();
    let players = DocumentStore::new(backend.clone())
        .collection(&player_schema())
        .await
        .unwrap();
    (backend, players)
}

#[tokio::test]
async fn exact_and_range_lookups() {
    let (_, players) = setup().await;

    players.document_with("a", doc! { "name": "x", "score": 1 }).save().await.unwrap();
    players.document_with("b", doc! { "name": "y", "score": 2 }).save().await.unwrap();

    let both = players.index("score", 1, Some(bson!(2))).await.unwrap();
    assert_eq!(both.iter().map(|d| d.key()).collect::<Vec<_>>(), vec!["a", "b"]);

    let named = players.index("name", "x", None).await.unwrap();
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].key(), "a");
    assert_eq!(named[0].state(), DocumentState::Saved);
}

#[tokio::test]
async fn range_bounds_are_inclusive_and_numeric() {
    let (_, players) = setup().await;

    for (key, score) in [("a", 1.0), ("b", 2.5), ("c", 4.0), ("d", 10.0)] {
        players.document_with(key, doc! { "score": score }).save().await.unwrap();
    }

    assert_eq!(
        players.index_keys_only("score", 2.5, Some(bson!(4))).await.unwrap(),
        vec!["b", "c"]
    );
    // numeric strings are numbers for numeric fields
    assert_eq!(
        players.index_keys_only("score", "4", Some(bson!("10"))).await.unwrap(),
        vec!["c", "d"]
    );
    assert_eq!(players.index_keys_only("score", 4_i64, None).await.unwrap(), vec!["c"]);
    assert!(players.index_keys_only("score", 5, Some(bson!(1))).await.unwrap().is_empty());
}

async fn ranked() -> Collection {
    let schema = SchemaRegistry::new()
        .define(SchemaDef::new("Ranked").field("rank", Property::integer().indexed()))
        .unwrap();
    DocumentStore::new(MemoryBackend::new())
        .collection(&schema)
        .await
        .unwrap()
}

#[tokio::test]
async fn integer_ranges_include_both_bounds() {
    let ranked = ranked().await;

    for (key, rank) in [("a", bson!(1)), ("b", bson!(2.0)), ("c", bson!(3_i64)), ("d", bson!(4))] {
        ranked.document_with(key, doc! { "rank": rank }).save().await.unwrap();
    }

    assert_eq!(
        ranked.index_keys_only("rank", 2, Some(bson!(3))).await.unwrap(),
        vec!["b", "c"]
    );
    assert_eq!(
        ranked.index_keys_only("rank", 1.0, Some(bson!(4.0))).await.unwrap(),
        vec!["a", "b", "c", "d"]
    );
    assert_eq!(
        ranked.index_keys_only("rank", "2", Some(bson!("3"))).await.unwrap(),
        vec!["b", "c"]
    );
    assert_eq!(
        ranked.index_keys_only("rank", 2.5, Some(bson!(3.5))).await.unwrap(),
        vec!["c"]
    );
}

#[tokio::test]
async fn large_integers_keep_distinct_rows() {
    let ranked = ranked().await;
    let big = 1_i64 << 53;

    ranked.document_with("a", doc! { "rank": big }).save().await.unwrap();
    ranked.document_with("b", doc! { "rank": big + 1 }).save().await.unwrap();

    assert_eq!(ranked.index_keys_only("rank", big, None).await.unwrap(), vec!["a"]);
    assert_eq!(ranked.index_keys_only("rank", big + 1, None).await.unwrap(), vec!["b"]);
    assert_eq!(
        ranked.index_keys_only("rank", (big + 1).to_string(), None).await.unwrap(),
        vec!["b"]
    );
    assert_eq!(
        ranked.index_keys_only("rank", big, Some(bson!(big + 1))).await.unwrap(),
        vec!["a", "b"]
    );
}

#[tokio::test]
async fn results_are_ordered_by_value_then_key() {
    let (_, players) = setup().await;

    for (key, name) in [("k1", "b"), ("k2", "a"), ("k3", "b"), ("k0", "c")] {
        players.document_with(key, doc! { "name": name }).save().await.unwrap();
    }

    assert_eq!(
        players.index_keys_only("name", "a", Some(bson!("c"))).await.unwrap(),
        vec!["k2", "k1", "k3", "k0"]
    );
}

#[tokio::test]
async fn changing_a_scalar_moves_the_key() {
    let (backend, players) = setup().await;
    let mut document = players.document_with("k", doc! { "name": "A" });
    document.save().await.unwrap();

    document.set("name", "B");
    document.save().await.unwrap();

    assert!(players.index_keys_only("name", "A", None).await.unwrap().is_empty());
    assert_eq!(players.index_keys_only("name", "B", None).await.unwrap(), vec!["k"]);
    // the emptied row is gone
    assert_eq!(
        backend.index_rows("Player", "name").await,
        vec![(IndexValue::String("B".into()), vec!["k".to_string()])]
    );
}

#[tokio::test]
async fn list_elements_are_reindexed_individually() {
    let (_, players) = setup().await;
    let mut document = players.document_with("k", doc! { "tags": ["x", "y"] });
    document.save().await.unwrap();

    document.set("tags", bson!(["y", "z", "z"]));
    document.save().await.unwrap();

    assert!(players.index_keys_only("tags", "x", None).await.unwrap().is_empty());
    assert_eq!(players.index_keys_only("tags", "y", None).await.unwrap(), vec!["k"]);
    assert_eq!(players.index_keys_only("tags", "z", None).await.unwrap(), vec!["k"]);

    // several matching elements still yield the document once
    let matches = players.index("tags", "a", Some(bson!("zz"))).await.unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn null_values_are_not_indexed() {
    let (backend, players) = setup().await;
    let mut document = players.document_with("k", doc! { "name": "x" });
    document.save().await.unwrap();

    document.set("name", Bson::Null);
    document.save().await.unwrap();

    assert!(backend.index_rows("Player", "name").await.is_empty());
    assert!(document.index_snapshot().unwrap().get("name").is_none());
}

#[tokio::test]
async fn delete_removes_index_entries() {
    let (backend, players) = setup().await;
    let mut document = players.document_with("k", doc! { "name": "x", "tags": ["t"] });
    document.save().await.unwrap();
    players.document_with("other", doc! { "name": "x" }).save().await.unwrap();

    document.delete().await.unwrap();

    assert_eq!(players.index_keys_only("name", "x", None).await.unwrap(), vec!["other"]);
    assert!(backend.index_rows("Player", "tags").await.is_empty());
}

#[tokio::test]
async fn delete_key_uses_the_stored_record() {
    let (backend, players) = setup().await;
    players.document_with("k", doc! { "name": "x", "tags": ["a", "b"] }).save().await.unwrap();

    players.delete_key("k").await.unwrap();

    assert!(backend.index_rows("Player", "name").await.is_empty());
    assert!(backend.index_rows("Player", "tags").await.is_empty());
    assert!(players.list_all_keys(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn pseudo_fields() {
    let (_, players) = setup().await;
    for key in ["1", "2", "3", "4", "5"] {
        players.document_with(key, doc! { "name": key }).save().await.unwrap();
    }

    assert_eq!(
        players.index_keys_only("$bucket", "ignored", None).await.unwrap(),
        vec!["1", "2", "3", "4", "5"]
    );
    assert_eq!(
        players.index_keys_only("$key", "2", Some(bson!("4"))).await.unwrap(),
        vec!["2", "3", "4"]
    );
    assert_eq!(players.index_keys_only("$key", "3", None).await.unwrap(), vec!["3"]);

    let loaded = players.index("$key", "4", Some(bson!("9"))).await.unwrap();
    assert_eq!(loaded.iter().map(|d| d.key()).collect::<Vec<_>>(), vec!["4", "5"]);
    assert_eq!(players.index("$bucket", "", None).await.unwrap().len(), 5);

    assert!(players.index_keys_only("$key", 3, None).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn list_all_by_key_range() {
    let (_, players) = setup().await;
    for key in ["a", "b", "c"] {
        players.document_with(key, doc! { "name": key }).save().await.unwrap();
    }

    assert_eq!(players.list_all_keys(Some("b"), None).await.unwrap(), vec!["b"]);
    assert_eq!(players.list_all_keys(None, Some("b")).await.unwrap(), vec!["a", "b"]);

    let mut all = players.list_all(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].get("name").unwrap(), &bson!("c"));
}

#[tokio::test]
async fn unindexed_fields_and_bad_bounds_are_rejected() {
    let (_, players) = setup().await;

    for field in ["note", "missing"] {
        assert!(matches!(
            players.index_keys_only(field, "x", None).await,
            Err(DocumentError::NotIndexed(name, kind)) if name == field && kind == "Player"
        ));
    }

    assert!(players
        .index_keys_only("name", bson!({ "a": 1 }), None)
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn failed_save_keeps_the_last_good_snapshot() {
    let backend = FlakyBackend::default();
    let players = DocumentStore::new(backend.clone())
        .collection(&player_schema())
        .await
        .unwrap();

    let mut document = players.document_with("k", doc! { "name": "A" });
    document.save().await.unwrap();
    let saved = document.index_snapshot().cloned();

    backend.fail_writes(true);
    document.set("name", "B");
    assert!(matches!(document.save().await, Err(DocumentError::Backend(_))));
    assert_eq!(document.index_snapshot().cloned(), saved);
    assert_eq!(players.index_keys_only("name", "A", None).await.unwrap(), vec!["k"]);

    backend.fail_writes(false);
    document.save().await.unwrap();
    assert!(players.index_keys_only("name", "A", None).await.unwrap().is_empty());
    assert_eq!(players.index_keys_only("name", "B", None).await.unwrap(), vec!["k"]);
}

#[tokio::test]
async fn racing_instances_are_reconciled_against_storage() {
    let (_, players) = setup().await;

    let mut first = players.document_with("k", doc! { "name": "one" });
    first.save().await.unwrap();
    let mut second = players.get("k").await.unwrap();

    first.set("name", "two");
    first.save().await.unwrap();

    // `second` still believes "one" is stored
    second.set("name", "three");
    second.save().await.unwrap();

    for stale in ["one", "two"] {
        assert!(players.index_keys_only("name", stale, None).await.unwrap().is_empty());
    }
    assert_eq!(players.index_keys_only("name", "three", None).await.unwrap(), vec!["k"]);
}

#[tokio::test]
async fn racing_instances_without_verification_keep_stale_rows() {
    let backend = MemoryBackend::builder()
        .verify_snapshots(false)
        .build()
        .await
        .unwrap();
    let players = DocumentStore::new(backend)
        .collection(&player_schema())
        .await
        .unwrap();

    let mut first = players.document_with("k", doc! { "name": "one" });
    first.save().await.unwrap();
    let mut second = players.get("k").await.unwrap();

    first.set("name", "two");
    first.save().await.unwrap();
    second.set("name", "three");
    second.save().await.unwrap();

    // last writer wins the record, the row written by `first` is left behind
    assert_eq!(players.index_keys_only("name", "two", None).await.unwrap(), vec!["k"]);
    assert_eq!(players.index_keys_only("name", "three", None).await.unwrap(), vec!["k"]);
    let mut stored = players.get("k").await.unwrap();
    assert_eq!(stored.get("name").unwrap(), &bson!("three"));
}

#[tokio::test]
async fn deleting_an_unloaded_instance_clears_stored_entries() {
    let (backend, players) = setup().await;
    players.document_with("k", doc! { "name": "x" }).save().await.unwrap();

    // never loaded, so the backend works out the removals
    players.document_with_key("k").delete().await.unwrap();

    assert!(backend.index_rows("Player", "name").await.is_empty());
    assert!(players.get("k").await.is_err());
}
