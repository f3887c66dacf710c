//! Integration Tests for the Store and Cache
//!
//! Exercises the public API end to end against the in-process backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sealkv::backend::Backend;
use sealkv::{
    AesGcmCipher, Cache, Index, KvError, MemoryBackend, PrimaryKeyType, RecordLayout, Scheme,
    Store, StoreType, Value,
};

// == Helper Functions ==

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    email: String,
    plan: String,
    seats: u32,
}

fn account(email: &str) -> Account {
    Account {
        email: email.to_string(),
        plan: "team".to_string(),
        seats: 5,
    }
}

fn create_store() -> Store<MemoryBackend> {
    Store::new(MemoryBackend::new())
}

fn create_encrypted_store() -> Store<MemoryBackend> {
    let store = create_store();
    let cipher = AesGcmCipher::with_cost(256, 1).unwrap();
    store.set_encryption(true, b"correct horse battery staple", Arc::new(cipher));
    store
}

fn accounts_scheme() -> Arc<Scheme> {
    Scheme::builder("accounts")
        .store_type(StoreType::Memory)
        .index(Index::new("email", &["email"]))
        .index(Index::new("plan_seats", &["plan", "seats"]).allow_duplicates())
        .build()
        .unwrap()
}

// == Round Trip Tests ==

#[tokio::test]
async fn test_roundtrip_every_value_kind() {
    let store = create_store();

    store.put_value("int", &Value::Int(-7), None).await.unwrap();
    store.put_value("text", &Value::Text("hi".to_string()), None).await.unwrap();
    store.put_value("bytes", &Value::Bytes(vec![0, 255, 16]), None).await.unwrap();
    store.put("record", &account("a@x.io"), None).await.unwrap();

    assert_eq!(store.get_value("int", None).await.unwrap(), Some(Value::Int(-7)));
    assert_eq!(
        store.get_value("text", None).await.unwrap(),
        Some(Value::Text("hi".to_string()))
    );
    assert_eq!(
        store.get_value("bytes", None).await.unwrap(),
        Some(Value::Bytes(vec![0, 255, 16]))
    );
    let read: Account = store.get("record", None).await.unwrap().unwrap();
    assert_eq!(read, account("a@x.io"));
}

#[tokio::test]
async fn test_expired_value_reads_as_missing() {
    let store = create_store();
    store.put_with_expiry("short", "v", 1, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.get::<String>("short", None).await.unwrap(), None);
}

// == Encryption Tests ==

#[tokio::test]
async fn test_encrypted_bytes_are_opaque() {
    let store = create_encrypted_store();
    store.put("acct", &account("secret@x.io"), None).await.unwrap();
    store.put("acct2", &account("secret@x.io"), None).await.unwrap();

    let raw = store.backend().get("acct").await.unwrap().unwrap();
    let raw2 = store.backend().get("acct2").await.unwrap().unwrap();
    assert!(!raw.windows(6).any(|w| w == b"secret"));
    assert!(!raw.windows(10).any(|w| w == b"value_type"));
    // Fresh salt and nonce per write
    assert_ne!(raw, raw2);

    let read: Account = store.get("acct", None).await.unwrap().unwrap();
    assert_eq!(read, account("secret@x.io"));

    // The same write without encryption exposes the envelope
    let plain_store = create_store();
    plain_store.put("acct", &account("secret@x.io"), None).await.unwrap();
    let plain = plain_store.backend().get("acct").await.unwrap().unwrap();
    assert!(plain.windows(10).any(|w| w == b"value_type"));
    assert!(plain.windows(6).any(|w| w == b"secret"));
}

#[tokio::test]
async fn test_tampering_any_byte_is_detected() {
    let store = create_encrypted_store();
    store.put("k", "payload", None).await.unwrap();
    let original = store.backend().get("k").await.unwrap().unwrap();

    for i in 0..original.len() {
        let mut tampered = original.clone();
        tampered[i] ^= 0x01;
        store.backend().set("k", tampered, None).await.unwrap();

        let result = store.get::<String>("k", None).await;
        assert!(
            matches!(result, Err(KvError::Decryption(_))),
            "flip at byte {} was not rejected: {:?}",
            i,
            result
        );
    }
}

#[tokio::test]
async fn test_truncated_ciphertext_is_invalid() {
    let store = create_encrypted_store();
    store.backend().set("k", vec![1, 2, 3], None).await.unwrap();

    let result = store.get::<String>("k", None).await;
    assert!(matches!(result, Err(KvError::InvalidCiphertext(_))));
}

// == Scheme Tests ==

#[tokio::test]
async fn test_index_points_at_record() {
    let store = create_store();
    let scheme = accounts_scheme();

    let key = store
        .put_scheme("", &account("ada@x.io"), Some(scheme.as_ref()), None)
        .await
        .unwrap();
    assert!(key.overall.starts_with("accounts:"));

    let owner = store.resolve_index(&scheme, "email", "ada@x.io").await.unwrap();
    assert_eq!(owner.as_deref(), Some(key.overall.as_str()));

    let composite = Index::key_from_values(&["team", "5"]);
    let by_composite: Account = store
        .get_by_index(&scheme, "plan_seats", &composite)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_composite, account("ada@x.io"));

    let by_email: Option<Account> = store.get_by_index(&scheme, "email", "nobody@x.io").await.unwrap();
    assert!(by_email.is_none());
}

#[tokio::test]
async fn test_unique_index_conflict_rolls_back_whole_record() {
    let store = create_store();
    let scheme = accounts_scheme();

    store
        .put_scheme("a", &account("dup@x.io"), Some(scheme.as_ref()), None)
        .await
        .unwrap();
    let before = store.backend().len().await;

    let result = store
        .put_scheme("b", &account("dup@x.io"), Some(scheme.as_ref()), None)
        .await;
    assert!(matches!(result, Err(KvError::Scheme(_))));
    assert_eq!(store.backend().len().await, before);
}

#[tokio::test]
async fn test_sequence_keys_increase() {
    let store = create_store();
    let scheme = Scheme::builder("orders")
        .store_type(StoreType::Memory)
        .sequence_key()
        .build()
        .unwrap();
    assert_eq!(scheme.primary_key_type(), PrimaryKeyType::Sequence);

    let mut keys = Vec::new();
    for i in 0..5 {
        let key = store
            .put_scheme("", &account(&format!("{}@x.io", i)), Some(scheme.as_ref()), None)
            .await
            .unwrap();
        keys.push(key.key.parse::<i64>().unwrap());
    }
    assert_eq!(keys, vec![1, 2, 3, 4, 5]);

    // Counter is not a record
    let records: std::collections::HashMap<String, Account> = store.scan("*", Some("orders")).await.unwrap();
    assert_eq!(records.len(), 5);
}

#[tokio::test]
async fn test_guid_keys_do_not_collide() {
    let store = create_store();
    let scheme = Scheme::builder("events")
        .store_type(StoreType::Memory)
        .guid_key()
        .build()
        .unwrap();

    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let key = store
            .put_scheme("", &account("e@x.io"), Some(scheme.as_ref()), None)
            .await
            .unwrap();
        assert!(seen.insert(key.key), "duplicate generated key");
    }
    assert_eq!(seen.len(), 10_000);
}

#[tokio::test]
async fn test_hash_table_encrypts_selected_fields_and_has_no_index() {
    let store = create_encrypted_store();
    let scheme = Scheme::builder("profiles")
        .store_type(StoreType::Memory)
        .layout(RecordLayout::HashTable)
        .index(Index::new("email", &["email"]))
        .encrypted_field("email")
        .build()
        .unwrap();

    store
        .put_scheme("p1", &account("hidden@x.io"), Some(scheme.as_ref()), None)
        .await
        .unwrap();

    let fields = store.backend().hget_all("profiles:p1").await.unwrap();
    assert_eq!(fields["plan"], b"\"team\"".to_vec());
    assert!(!fields["email"].windows(6).any(|w| w == b"hidden"));

    let read: Account = store.get_scheme("p1", &scheme).await.unwrap().unwrap();
    assert_eq!(read, account("hidden@x.io"));

    // Hash-table records are never indexed
    assert!(!store.backend().exists("profiles:lookup:email").await.unwrap());
    assert!(matches!(
        store.resolve_index(&scheme, "email", "hidden@x.io").await,
        Err(KvError::Scheme(_))
    ));
}

// == Cache Tests ==

#[test]
fn test_cache_in_front_of_store() {
    tokio_test::block_on(async {
        let store = create_store();
        store.put("user:1", "Ada", None).await.unwrap();

        let cache: Cache<String> = Cache::new(10, Duration::from_secs(60));
        for _ in 0..3 {
            let store = store.clone();
            let name = cache
                .get_or_compute_async("user:1", |key| async move {
                    store
                        .get::<String>(&key, None)
                        .await?
                        .ok_or(KvError::NotFound(key))
                })
                .await
                .unwrap();
            assert_eq!(name, "Ada");
        }

        assert_eq!(cache.hit_count("user:1"), Some(3));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    });
}
