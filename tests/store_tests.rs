//! Integration tests for the store layer, focused on the conditional-UPDATE
//! atomicity contract.

use std::sync::Arc;

use amulet::server::store::{LicenseFilter, Store};
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory SQLite store with the full schema applied.
async fn test_store() -> Arc<Store> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");

    sqlx::migrate!("migrations/sqlite")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    Arc::new(Store::SQLite(pool))
}

#[tokio::test]
async fn insert_and_fetch_license() {
    let store = test_store().await;

    let created = store
        .insert_license("AMU-TEST-0001", None, "active", 10)
        .await
        .unwrap();
    assert_eq!(created.key, "AMU-TEST-0001");
    assert_eq!(created.credit, 10);
    assert!(created.mac_id.is_none());

    let fetched = store
        .get_license_by_key("AMU-TEST-0001")
        .await
        .unwrap()
        .expect("license should exist");
    assert_eq!(fetched.id, created.id);

    assert!(store.get_license_by_key("AMU-NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn bind_mac_first_caller_wins() {
    let store = test_store().await;
    store
        .insert_license("AMU-BIND-0001", None, "active", 5)
        .await
        .unwrap();

    assert!(store.bind_mac("AMU-BIND-0001", "AA:BB:CC").await.unwrap());
    // Second bind attempt loses: the guard requires mac_id IS NULL.
    assert!(!store.bind_mac("AMU-BIND-0001", "DD:EE:FF").await.unwrap());

    let license = store
        .get_license_by_key("AMU-BIND-0001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(license.mac_id.as_deref(), Some("AA:BB:CC"));
}

#[tokio::test]
async fn bind_mac_requires_active_status() {
    let store = test_store().await;
    store
        .insert_license("AMU-BIND-0002", None, "inactive", 5)
        .await
        .unwrap();

    assert!(!store.bind_mac("AMU-BIND-0002", "AA:BB:CC").await.unwrap());
}

#[tokio::test]
async fn debit_respects_balance_guard() {
    let store = test_store().await;
    store
        .insert_license("AMU-DEB-0001", Some("AA:BB:CC"), "active", 5)
        .await
        .unwrap();

    let balance = store
        .debit_credit("AMU-DEB-0001", "AA:BB:CC", 3)
        .await
        .unwrap();
    assert_eq!(balance, Some(2));

    // 3 > 2: the guard rejects and the balance is untouched.
    let failed = store
        .debit_credit("AMU-DEB-0001", "AA:BB:CC", 3)
        .await
        .unwrap();
    assert_eq!(failed, None);

    let license = store
        .get_license_by_key("AMU-DEB-0001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(license.credit, 2);
}

#[tokio::test]
async fn debit_requires_matching_mac_and_status() {
    let store = test_store().await;
    store
        .insert_license("AMU-DEB-0002", Some("AA:BB:CC"), "active", 5)
        .await
        .unwrap();
    store
        .insert_license("AMU-DEB-0003", Some("AA:BB:CC"), "inactive", 5)
        .await
        .unwrap();

    assert_eq!(
        store
            .debit_credit("AMU-DEB-0002", "ZZ:ZZ:ZZ", 1)
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        store
            .debit_credit("AMU-DEB-0003", "AA:BB:CC", 1)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn exact_balance_debit_reaches_zero() {
    let store = test_store().await;
    store
        .insert_license("AMU-DEB-0004", Some("AA:BB:CC"), "active", 4)
        .await
        .unwrap();

    let balance = store
        .debit_credit("AMU-DEB-0004", "AA:BB:CC", 4)
        .await
        .unwrap();
    assert_eq!(balance, Some(0));
}

#[tokio::test]
async fn concurrent_debits_never_overdraw() {
    let store = test_store().await;
    store
        .insert_license("AMU-RACE-0001", Some("AA:BB:CC"), "active", 3)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.debit_credit("AMU-RACE-0001", "AA:BB:CC", 1).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            successes += 1;
        }
    }

    assert_eq!(successes, 3);
    let license = store
        .get_license_by_key("AMU-RACE-0001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(license.credit, 0);
}

#[tokio::test]
async fn refund_skips_status_check() {
    let store = test_store().await;
    store
        .insert_license("AMU-REF-0001", Some("AA:BB:CC"), "inactive", 2)
        .await
        .unwrap();

    let balance = store
        .refund_credit("AMU-REF-0001", "AA:BB:CC", 3)
        .await
        .unwrap();
    assert_eq!(balance, Some(5));
}

#[tokio::test]
async fn refund_requires_matching_mac() {
    let store = test_store().await;
    store
        .insert_license("AMU-REF-0002", Some("AA:BB:CC"), "active", 2)
        .await
        .unwrap();

    assert_eq!(
        store
            .refund_credit("AMU-REF-0002", "ZZ:ZZ:ZZ", 3)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn checkout_claims_lowest_free_key() {
    let store = test_store().await;
    store.insert_api_key("key-one", "active", None).await.unwrap();
    store.insert_api_key("key-two", "active", None).await.unwrap();

    let first = store.checkout_api_key().await.unwrap().unwrap();
    assert_eq!(first.api_key, "key-one");
    assert!(first.in_use);

    let second = store.checkout_api_key().await.unwrap().unwrap();
    assert_eq!(second.api_key, "key-two");

    // Pool exhausted.
    assert!(store.checkout_api_key().await.unwrap().is_none());
}

#[tokio::test]
async fn checkout_skips_inactive_keys() {
    let store = test_store().await;
    store
        .insert_api_key("key-dead", "inactive", None)
        .await
        .unwrap();
    store
        .insert_api_key("key-live", "active", None)
        .await
        .unwrap();

    let key = store.checkout_api_key().await.unwrap().unwrap();
    assert_eq!(key.api_key, "key-live");
}

#[tokio::test]
async fn concurrent_checkouts_claim_distinct_keys() {
    let store = test_store().await;
    store.insert_api_key("key-a", "active", None).await.unwrap();
    store.insert_api_key("key-b", "active", None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.checkout_api_key().await }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(key) = handle.await.unwrap().unwrap() {
            claimed.push(key.api_key);
        }
    }

    claimed.sort();
    assert_eq!(claimed, vec!["key-a".to_string(), "key-b".to_string()]);
}

#[tokio::test]
async fn release_returns_key_to_rotation() {
    let store = test_store().await;
    store.insert_api_key("key-one", "active", None).await.unwrap();

    store.checkout_api_key().await.unwrap().unwrap();
    assert!(store.checkout_api_key().await.unwrap().is_none());

    assert!(store.release_api_key("key-one").await.unwrap());

    let again = store.checkout_api_key().await.unwrap().unwrap();
    assert_eq!(again.api_key, "key-one");
}

#[tokio::test]
async fn release_is_idempotent_and_tolerates_unknown_keys() {
    let store = test_store().await;
    store.insert_api_key("key-one", "active", None).await.unwrap();

    assert!(store.release_api_key("key-one").await.unwrap());
    assert!(store.release_api_key("key-one").await.unwrap());
    assert!(!store.release_api_key("key-missing").await.unwrap());
}

#[tokio::test]
async fn deactivate_pulls_key_from_rotation() {
    let store = test_store().await;
    store.insert_api_key("key-one", "active", None).await.unwrap();

    store.checkout_api_key().await.unwrap().unwrap();
    assert!(store.deactivate_api_key("key-one").await.unwrap());

    let key = store.get_api_key(1).await.unwrap().unwrap();
    assert_eq!(key.status, "inactive");
    assert!(!key.in_use);

    assert!(store.checkout_api_key().await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_price_inserts_then_overwrites() {
    let store = test_store().await;

    store.upsert_price("flux-dev", 1).await.unwrap();
    assert_eq!(store.price_for_model("flux-dev").await.unwrap(), Some(1));

    store.upsert_price("flux-dev", 3).await.unwrap();
    assert_eq!(store.price_for_model("flux-dev").await.unwrap(), Some(3));

    assert_eq!(store.price_for_model("unknown").await.unwrap(), None);
}

#[tokio::test]
async fn ensure_defaults_seeds_config_and_prices() {
    let store = test_store().await;

    assert!(store.get_app_config().await.unwrap().is_none());

    store.ensure_defaults().await.unwrap();

    let cfg = store.get_app_config().await.unwrap().unwrap();
    assert_eq!(cfg.latest_version, "2.3.3");
    assert!(!cfg.maintenance);

    let prices = store.list_prices().await.unwrap();
    assert!(!prices.is_empty());
    assert_eq!(store.price_for_model("flux-pro-v1-1").await.unwrap(), Some(2));

    // A second run changes nothing.
    store.ensure_defaults().await.unwrap();
    assert_eq!(store.list_prices().await.unwrap().len(), prices.len());
}

#[tokio::test]
async fn list_licenses_applies_filters_and_pagination() {
    let store = test_store().await;
    store
        .insert_license("AMU-LIST-0001", Some("AA:BB:CC"), "active", 10)
        .await
        .unwrap();
    store
        .insert_license("AMU-LIST-0002", None, "inactive", 0)
        .await
        .unwrap();
    store
        .insert_license("AMU-LIST-0003", None, "active", 5)
        .await
        .unwrap();

    let active = LicenseFilter {
        status: Some("active".to_string()),
        limit: 50,
        offset: 0,
        ..Default::default()
    };
    let (rows, total) = store.list_licenses(&active).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(rows.len(), 2);

    let broke = LicenseFilter {
        max_credit: Some(0),
        limit: 50,
        offset: 0,
        ..Default::default()
    };
    let (rows, total) = store.list_licenses(&broke).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].key, "AMU-LIST-0002");

    let by_mac = LicenseFilter {
        search: Some("AA:BB".to_string()),
        limit: 50,
        offset: 0,
        ..Default::default()
    };
    let (rows, _) = store.list_licenses(&by_mac).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "AMU-LIST-0001");

    let paged = LicenseFilter {
        limit: 2,
        offset: 2,
        ..Default::default()
    };
    let (rows, total) = store.list_licenses(&paged).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn activity_log_lists_newest_first() {
    let store = test_store().await;

    store.log_activity("a", "first").await.unwrap();
    store.log_activity("b", "second").await.unwrap();
    store.log_activity("c", "third").await.unwrap();

    let logs = store.list_activity(2).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].action, "c");
    assert_eq!(logs[1].action, "b");
}
