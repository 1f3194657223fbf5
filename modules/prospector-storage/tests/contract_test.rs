//! The same behaviour is expected from every backend.

use std::sync::Arc;

use bytes::Bytes;
use prospector_storage::{
    get_json, put_json, LocalStore, MemoryStore, Precondition, PutOutcome, Storage,
};

async fn exercise(store: Arc<dyn Storage>) {
    // Absent keys read as None.
    assert!(store.get("c/missing.json").await.unwrap().is_none());

    // Create-if-absent succeeds once.
    let created = store
        .put("c/a.json", Bytes::from_static(b"{\"n\":1}"), Precondition::DoesNotExist)
        .await
        .unwrap();
    let PutOutcome::Written { version } = created else {
        panic!("first create must win");
    };
    assert_eq!(
        store
            .put("c/a.json", Bytes::from_static(b"{}"), Precondition::DoesNotExist)
            .await
            .unwrap(),
        PutOutcome::PreconditionFailed
    );

    // CAS against the version we just got.
    let swapped = store
        .put(
            "c/a.json",
            Bytes::from_static(b"{\"n\":2}"),
            Precondition::MatchesVersion(version.clone()),
        )
        .await
        .unwrap();
    assert!(swapped.is_written());
    assert_eq!(
        store
            .put("c/a.json", Bytes::from_static(b"{}"), Precondition::MatchesVersion(version))
            .await
            .unwrap(),
        PutOutcome::PreconditionFailed
    );

    // CAS on a missing key fails.
    assert_eq!(
        store
            .put("c/none.json", Bytes::from_static(b"{}"), Precondition::MatchesVersion("1".into()))
            .await
            .unwrap(),
        PutOutcome::PreconditionFailed
    );

    // JSON helpers.
    put_json(store.as_ref(), "c/b.json", &serde_json::json!({"n": 3}), Precondition::None)
        .await
        .unwrap();
    let (value, _) = get_json::<serde_json::Value>(store.as_ref(), "c/b.json")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["n"], 3);

    // Listing is prefix-filtered and sorted.
    store
        .put("d/other.json", Bytes::from_static(b"x"), Precondition::None)
        .await
        .unwrap();
    let keys: Vec<String> = store
        .list("c/")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(keys, vec!["c/a.json", "c/b.json"]);

    // Deletes are idempotent.
    store.delete("c/a.json").await.unwrap();
    store.delete("c/a.json").await.unwrap();
    assert!(store.get("c/a.json").await.unwrap().is_none());

    // Corrupt JSON surfaces as an error rather than a panic.
    store
        .put("c/bad.json", Bytes::from_static(b"{not json"), Precondition::None)
        .await
        .unwrap();
    assert!(get_json::<serde_json::Value>(store.as_ref(), "c/bad.json")
        .await
        .is_err());
}

#[tokio::test]
async fn memory_store_honours_contract() {
    exercise(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn local_store_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(Arc::new(LocalStore::new(dir.path()))).await;
}

#[tokio::test]
async fn concurrent_creates_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Storage> = Arc::new(LocalStore::new(dir.path()));

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .put("race/lease.json", Bytes::from(vec![i]), Precondition::DoesNotExist)
                .await
                .unwrap()
                .is_written()
        }));
    }

    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
