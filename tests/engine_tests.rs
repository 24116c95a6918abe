//! Integration Tests for the Cache Engine
//!
//! Drives the public `Cache` handle end to end. Timing-sensitive tests run
//! on a paused tokio clock and move it with `tokio::time::advance`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachegraph::breaker::BreakerMode;
use cachegraph::cache::{BulkRequest, BulkSetItem, CacheState, EvictionPolicy};
use cachegraph::config::{CircuitBreakerConfig, CompressionConfig};
use cachegraph::events::EvictReason;
use cachegraph::persistence::{MemoryAdapter, PersistenceAdapter};
use cachegraph::{Cache, CacheConfig, CacheError, CacheEvent, EventKind, SetOptions};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok, assert_ready, assert_ready_ok};

// == Helper Functions ==

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn cache() -> Cache {
    Cache::new(CacheConfig::default())
}

fn swr_cache() -> Cache {
    Cache::new(CacheConfig {
        stale_while_revalidate: true,
        ..CacheConfig::default()
    })
}

fn breaker_cache(threshold: u32, recovery: Duration) -> Cache {
    Cache::new(CacheConfig {
        circuit_breaker: CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            recovery_timeout: recovery,
            ..CircuitBreakerConfig::default()
        },
        ..CacheConfig::default()
    })
}

/// Loader that counts its calls and fails while `fail` is set.
fn counting_loader(
    calls: &Arc<AtomicUsize>,
    fail: bool,
) -> impl FnOnce() -> std::future::Ready<anyhow::Result<Value>> {
    let calls = calls.clone();
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        std::future::ready(if fail {
            Err(anyhow::anyhow!("backend unavailable"))
        } else {
            Ok(json!({ "load": n }))
        })
    }
}

// == Core Operations ==

#[tokio::test]
async fn test_set_get_roundtrip_with_and_without_compression() {
    let cache = Cache::new(CacheConfig {
        compression: CompressionConfig {
            enabled: true,
            threshold: 128,
            ..CompressionConfig::default()
        },
        ..CacheConfig::default()
    });
    let small = json!({"id": 1});
    let large = json!({"body": "abcdefgh".repeat(512), "tags": ["x", "y"]});

    cache.set("small", small.clone(), SetOptions::new()).await.unwrap();
    cache.set("large", large.clone(), SetOptions::new()).await.unwrap();

    assert_eq!(cache.get("small").await, Some(small));
    assert_eq!(cache.get("large").await, Some(large));
    assert!(!cache.entry_info("small").await.unwrap().compressed);
    assert!(cache.entry_info("large").await.unwrap().compressed);

    let stats = cache.stats().await;
    assert_eq!(stats.compressed_entries, 1);
    assert!(stats.compression_ratio < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundary() {
    let cache = cache();
    cache
        .set("k", json!("v"), SetOptions::new().ttl(ms(100)))
        .await
        .unwrap();

    tokio::time::advance(ms(50)).await;
    assert_eq!(cache.get("k").await, Some(json!("v")));

    tokio::time::advance(ms(100)).await;
    assert_eq!(cache.get("k").await, None);
    assert!(!cache.has("k").await);
}

#[tokio::test]
async fn test_has_respects_absence_without_touching_stats() {
    let cache = cache();
    cache.set("k", json!(1), SetOptions::new()).await.unwrap();

    assert!(cache.has("k").await);
    assert!(!cache.has("other").await);
    assert_eq!(cache.stats().await.total_accesses, 0);
}

#[tokio::test]
async fn test_capacity_holds_after_every_set() {
    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Ttl] {
        let cache = Cache::new(CacheConfig {
            max_items: 5,
            eviction_policy: policy,
            ..CacheConfig::default()
        });
        for i in 0..25 {
            cache
                .set(&format!("k{}", i), json!(i), SetOptions::new().ttl(Duration::from_secs(60)))
                .await
                .unwrap();
            assert!(cache.len().await <= 5, "policy {} exceeded capacity", policy);
        }
        assert_eq!(cache.stats().await.evictions, 20);
    }
}

#[tokio::test]
async fn test_manual_policy_never_evicts() {
    let cache = Cache::new(CacheConfig {
        max_items: 2,
        eviction_policy: EvictionPolicy::Manual,
        ..CacheConfig::default()
    });
    for i in 0..5 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::new()).await.unwrap();
    }
    assert_eq!(cache.len().await, 5);
}

// == Dependencies ==

#[tokio::test]
async fn test_cascading_delete_chain() {
    let cache = cache();
    cache.set("parent", json!(1), SetOptions::new()).await.unwrap();
    cache
        .set("child", json!(2), SetOptions::new().depends_on(["parent"]))
        .await
        .unwrap();
    cache
        .set("grandchild", json!(3), SetOptions::new().depends_on(["child"]))
        .await
        .unwrap();

    let removed = cache.delete("parent").await;

    assert_eq!(removed, vec!["parent", "child", "grandchild"]);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_dependency_cycle_terminates() {
    let cache = cache();
    cache.set("a", json!(1), SetOptions::new()).await.unwrap();
    cache
        .set("b", json!(2), SetOptions::new().depends_on(["a"]))
        .await
        .unwrap();
    cache
        .set("a", json!(3), SetOptions::new().depends_on(["b"]))
        .await
        .unwrap();

    let mut removed = cache.delete("b").await;
    removed.sort();
    assert_eq!(removed, vec!["a", "b"]);
}

#[tokio::test]
async fn test_eviction_cascades_with_dependency_reason() {
    let cache = Cache::new(CacheConfig {
        max_items: 2,
        ..CacheConfig::default()
    });
    let evictions = Arc::new(Mutex::new(Vec::new()));
    let sink = evictions.clone();
    cache.subscribe(EventKind::Evict, move |event| {
        if let CacheEvent::Evict { key, reason } = event {
            sink.lock().push((key.clone(), *reason));
        }
        Ok(())
    });

    cache.set("parent", json!(1), SetOptions::new()).await.unwrap();
    cache
        .set("child", json!(2), SetOptions::new().depends_on(["parent"]))
        .await
        .unwrap();
    cache.get("child").await;
    cache.set("other", json!(3), SetOptions::new()).await.unwrap();

    assert_eq!(
        *evictions.lock(),
        vec![
            ("parent".to_string(), EvictReason::Lru),
            ("child".to_string(), EvictReason::Dependency),
        ]
    );
    assert_eq!(cache.keys(None).await.unwrap(), vec!["other"]);
}

// == Tags & Groups ==

#[tokio::test]
async fn test_invalidate_by_tag_removes_exactly_members() {
    let cache = cache();
    let users = SetOptions::new().tags(["users"]);
    cache.set("user:1", json!(1), users.clone()).await.unwrap();
    cache.set("user:2", json!(2), users).await.unwrap();
    cache.set("post:1", json!(3), SetOptions::new()).await.unwrap();

    let affected = Arc::new(Mutex::new(Vec::new()));
    let sink = affected.clone();
    cache.subscribe(EventKind::TagInvalidated, move |event| {
        if let CacheEvent::TagInvalidated { affected_keys, .. } = event {
            sink.lock().extend(affected_keys.iter().cloned());
        }
        Ok(())
    });

    let removed = cache.invalidate_by_tag("users").await;

    assert_eq!(removed, vec!["user:1", "user:2"]);
    assert_eq!(*affected.lock(), vec!["user:1", "user:2"]);
    assert!(cache.has("post:1").await);
    assert!(cache.tag("users").await.is_none());
}

#[tokio::test]
async fn test_invalidate_by_tags_cascades_per_tag() {
    let cache = cache();
    cache
        .set("config", json!(1), SetOptions::new().tags(["settings"]))
        .await
        .unwrap();
    cache
        .set("derived", json!(2), SetOptions::new().depends_on(["config"]))
        .await
        .unwrap();

    let result = cache.invalidate_by_tags(&["settings", "unknown"]).await;

    assert_eq!(result["settings"], vec!["config", "derived"]);
    assert!(result["unknown"].is_empty());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_group_lifecycle() {
    let cache = cache();
    for key in ["a", "b", "c"] {
        cache.set(key, json!(key), SetOptions::new()).await.unwrap();
    }

    cache
        .create_group("batch", vec!["a".into()], Some(json!({"ttl": 10})))
        .await
        .unwrap();
    cache.add_to_group("batch", vec!["b".into(), "c".into()]).await.unwrap();
    cache.remove_from_group("batch", &["c".to_string()]).await.unwrap();
    assert!(matches!(
        cache.create_group("batch", Vec::new(), None).await,
        Err(CacheError::GroupExists(_))
    ));
    assert_eq!(cache.groups().await, vec!["batch"]);

    let removed = cache.delete_group("batch").await.unwrap();
    assert_eq!(removed, vec!["a", "b"]);
    assert_eq!(cache.keys(None).await.unwrap(), vec!["c"]);
    assert!(cache.group("batch").await.is_none());
}

#[tokio::test]
async fn test_bulk_executes_in_order_and_publishes_once() {
    let cache = cache();
    cache.set("old", json!(0), SetOptions::new()).await.unwrap();
    let published = Arc::new(AtomicUsize::new(0));
    let counter = published.clone();
    cache.subscribe(EventKind::BulkOperation, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let result = cache
        .bulk(BulkRequest {
            get: vec!["old".into(), "new".into()],
            set: vec![
                BulkSetItem {
                    key: "new".into(),
                    value: json!(1),
                    options: SetOptions::new(),
                },
                BulkSetItem {
                    key: String::new(),
                    value: json!(2),
                    options: SetOptions::new(),
                },
            ],
            delete: vec!["old".into()],
            invalidate_tags: Vec::new(),
        })
        .await;

    assert_eq!(result.get["old"], Some(json!(0)));
    assert_eq!(result.get["new"], None);
    assert_eq!(result.set, vec!["new"]);
    assert_eq!(result.set_errors.len(), 1);
    assert_eq!(result.delete["old"], vec!["old"]);
    assert_eq!(published.load(Ordering::SeqCst), 1);
}

// == Stale While Revalidate ==

#[tokio::test(start_paused = true)]
async fn test_stale_read_returns_cached_value_and_refreshes() {
    let cache = swr_cache();
    let options = SetOptions::new().ttl(ms(100)).stale_ttl(ms(200));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();

    tokio::time::advance(ms(150)).await;
    let read = cache
        .get_or_compute_with_stale("k", options.clone(), || async { Ok(json!("v2")) })
        .await
        .unwrap();

    assert_eq!(read.value, json!("v1"));
    assert_eq!(read.state, CacheState::Stale);
    let refresh = read.refresh.expect("stale read schedules a refresh");
    assert_eq!(refresh.key(), "k");
    refresh.join().await.unwrap();

    assert_eq!(cache.get("k").await, Some(json!("v2")));
    // The refresh recomputed the deadlines from the original options
    tokio::time::advance(ms(99)).await;
    assert_eq!(cache.get("k").await, Some(json!("v2")));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_read_skips_loader() {
    let cache = swr_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set("k", json!("cached"), SetOptions::new().ttl(ms(100)))
        .await
        .unwrap();

    let read = cache
        .get_or_compute_with_stale("k", SetOptions::new(), counting_loader(&calls, false))
        .await
        .unwrap();

    assert_eq!(read.state, CacheState::Fresh);
    assert!(read.refresh.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_read_loads_synchronously() {
    let cache = swr_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = SetOptions::new().ttl(ms(100)).stale_ttl(ms(200));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();

    tokio::time::advance(ms(250)).await;
    let read = cache
        .get_or_compute_with_stale("k", options, counting_loader(&calls, false))
        .await
        .unwrap();

    assert_eq!(read.state, CacheState::Loaded);
    assert_eq!(read.value, json!({"load": 1}));
    assert_eq!(cache.get("k").await, Some(json!({"load": 1})));
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_stale_value() {
    let cache = swr_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = SetOptions::new().ttl(ms(100)).stale_ttl(ms(500));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();

    tokio::time::advance(ms(150)).await;
    let read = cache
        .get_or_compute_with_stale("k", options.clone(), counting_loader(&calls, true))
        .await
        .unwrap();
    let outcome = read.refresh.unwrap().join().await;
    assert!(matches!(outcome, Err(CacheError::Loader { .. })));

    // Still stale, still served, and a new read schedules a new attempt
    let read = cache
        .get_or_compute_with_stale("k", options, counting_loader(&calls, true))
        .await
        .unwrap();
    assert_eq!(read.value, json!("v1"));
    assert_err!(read.refresh.unwrap().join().await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_plain_get_in_stale_window_misses_but_keeps_entry() {
    let cache = swr_cache();
    let options = SetOptions::new().ttl(ms(100)).stale_ttl(ms(200));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();

    tokio::time::advance(ms(150)).await;
    assert_eq!(cache.get("k").await, None);

    let read = cache
        .get_or_compute_with_stale("k", options, || async { Ok(json!("v2")) })
        .await
        .unwrap();
    assert_eq!(read.state, CacheState::Stale);
    assert_eq!(read.value, json!("v1"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_after_destroy_writes_into_cleared_store() {
    let cache = swr_cache();
    let options = SetOptions::new().ttl(ms(100)).stale_ttl(ms(200));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();
    cache.set("other", json!(0), SetOptions::new()).await.unwrap();

    tokio::time::advance(ms(150)).await;
    let read = cache
        .get_or_compute_with_stale("k", options, || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!("late"))
        })
        .await
        .unwrap();

    cache.destroy().await;
    assert!(cache.is_empty().await);

    read.refresh.unwrap().join().await.unwrap();
    assert_eq!(cache.keys(None).await.unwrap(), vec!["k"]);
    assert_eq!(cache.get("k").await, Some(json!("late")));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_ids_are_distinct() {
    let cache = swr_cache();
    let options = SetOptions::new().ttl(ms(10)).stale_ttl(ms(1000));
    cache.set("a", json!(1), options.clone()).await.unwrap();
    cache.set("b", json!(2), options.clone()).await.unwrap();
    tokio::time::advance(ms(20)).await;

    let first = cache
        .get_or_compute_with_stale("a", options.clone(), || async { Ok(json!(10)) })
        .await
        .unwrap()
        .refresh
        .unwrap();
    let second = cache
        .get_or_compute_with_stale("b", options, || async { Ok(json!(20)) })
        .await
        .unwrap()
        .refresh
        .unwrap();

    assert!(second.id() > first.id());
    first.join().await.unwrap();
    second.join().await.unwrap();
}

// == Compute & Circuit Breaker ==

#[tokio::test]
async fn test_get_or_compute_caches_loader_result() {
    let cache = cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, false))
        .await
        .unwrap();
    let second = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, false))
        .await
        .unwrap();

    assert_eq!(first, json!({"load": 1}));
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loader_failure_propagates_without_breaker() {
    let cache = cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
        .await;

    assert!(matches!(result, Err(CacheError::Loader { ref key, .. }) if key == "k"));
    assert!(cache.breaker_state().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_rejects_and_half_opens() {
    let cache = breaker_cache(2, ms(1000));
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let result = cache
            .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
            .await;
        assert!(matches!(result, Err(CacheError::Loader { .. })));
    }
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Open);

    let result = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
        .await;
    assert!(matches!(result, Err(CacheError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "open breaker must not call the loader");

    tokio::time::advance(ms(1000)).await;
    let trial = assert_ok!(
        cache
            .get_or_compute("k", SetOptions::new(), counting_loader(&calls, false))
            .await
    );
    assert_eq!(trial, json!({"load": 3}));
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_half_open_trial_reopens() {
    let cache = breaker_cache(1, ms(500));
    let calls = Arc::new(AtomicUsize::new(0));

    let _ = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
        .await;
    tokio::time::advance(ms(500)).await;
    let _ = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
        .await;

    let state = cache.breaker_state().unwrap();
    assert_eq!(state.mode, BreakerMode::Open);
    assert_eq!(state.retry_in, Some(ms(500)));
    assert_eq!(state.failures_in_window, 2);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_fallback_is_returned_not_cached() {
    let cache = Cache::new(CacheConfig {
        circuit_breaker: CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            fallback: Some(Arc::new(|key: &str| json!({ "fallback": key }))),
            ..CircuitBreakerConfig::default()
        },
        ..CacheConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));

    // Loader failure substitutes the fallback
    let value = assert_ok!(
        cache
            .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
            .await
    );
    assert_eq!(value, json!({"fallback": "k"}));

    // Open breaker also substitutes it, without calling the loader
    let read = cache
        .get_or_compute_with_stale("k", SetOptions::new(), counting_loader(&calls, false))
        .await
        .unwrap();
    assert_eq!(read.state, CacheState::Fallback);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.has("k").await);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_half_open_trial_releases_breaker() {
    let cache = breaker_cache(1, ms(100));
    let calls = Arc::new(AtomicUsize::new(0));
    let _ = cache
        .get_or_compute("k", SetOptions::new(), counting_loader(&calls, true))
        .await;
    tokio::time::advance(ms(150)).await;

    let slow = cache.get_or_compute("k", SetOptions::new(), || async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("slow"))
    });
    assert!(tokio::time::timeout(ms(10), slow).await.is_err());
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Open);

    tokio::time::advance(ms(100)).await;
    let value = assert_ok!(
        cache
            .get_or_compute("k", SetOptions::new(), counting_loader(&calls, false))
            .await
    );
    assert_eq!(value, json!({"load": 2}));
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_refresh_trial_releases_breaker() {
    let cache = Cache::new(CacheConfig {
        stale_while_revalidate: true,
        circuit_breaker: CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            recovery_timeout: ms(100),
            ..CircuitBreakerConfig::default()
        },
        ..CacheConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let options = SetOptions::new().ttl(ms(10)).stale_ttl(ms(10_000));
    cache.set("k", json!("v1"), options.clone()).await.unwrap();
    let _ = cache
        .get_or_compute("other", SetOptions::new(), counting_loader(&calls, true))
        .await;
    tokio::time::advance(ms(150)).await;

    let broken = true;
    let read = cache
        .get_or_compute_with_stale("k", options, move || async move {
            assert!(!broken, "loader bug");
            Ok(json!("v2"))
        })
        .await
        .unwrap();
    assert_eq!(read.value, json!("v1"));
    let outcome = read.refresh.unwrap().join().await;
    assert!(matches!(outcome, Err(CacheError::Internal(_))));
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Open);

    tokio::time::advance(ms(100)).await;
    assert_ok!(
        cache
            .get_or_compute("other", SetOptions::new(), counting_loader(&calls, false))
            .await
    );
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Closed);
}

#[tokio::test]
async fn test_large_values_and_keys_round_trip() {
    let cache = Cache::new(CacheConfig {
        compression: CompressionConfig {
            enabled: true,
            ..CompressionConfig::default()
        },
        ..CacheConfig::default()
    });
    let big = json!("y".repeat(2 * 1024 * 1024));
    let loaded = big.clone();

    let value = assert_ok!(
        cache
            .get_or_compute("big", SetOptions::new(), move || async move { Ok(loaded) })
            .await
    );
    assert_eq!(value, big);
    assert_eq!(cache.get("big").await, Some(big));

    let long_key = "k".repeat(300);
    cache.set(&long_key, json!(1), SetOptions::new()).await.unwrap();
    assert_eq!(cache.get(&long_key).await, Some(json!(1)));
}

#[tokio::test]
async fn test_loaded_value_returned_when_store_rejects_it() {
    let cache = Cache::new(CacheConfig {
        max_value_size: Some(16),
        circuit_breaker: CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        },
        ..CacheConfig::default()
    });

    let value = assert_ok!(
        cache
            .get_or_compute("k", SetOptions::new(), || async { Ok(json!("x".repeat(100))) })
            .await
    );

    assert_eq!(value, json!("x".repeat(100)));
    assert!(!cache.has("k").await);
    assert_eq!(cache.breaker_state().unwrap().mode, BreakerMode::Closed);
}

// == Warmup ==

#[tokio::test]
async fn test_warmup_skips_failures() {
    let cache = cache();

    let report = cache
        .warmup(["a", "bad", "c"], SetOptions::new().tags(["warm"]), |key| async move {
            if key == "bad" {
                Err(anyhow::anyhow!("no such row"))
            } else {
                Ok(json!({ "key": key }))
            }
        })
        .await;

    assert_eq!(report.loaded, vec!["a", "c"]);
    assert!(report.failed["bad"].contains("no such row"));
    assert_eq!(cache.get("c").await, Some(json!({"key": "c"})));
    assert_eq!(cache.tag("warm").await.unwrap().keys.len(), 2);
}

// == Events ==

#[tokio::test]
async fn test_subscribers_run_in_order_and_failures_are_isolated() {
    let cache = cache();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = order.clone();
    cache.subscribe(EventKind::Set, move |_| {
        first.lock().push("first");
        Err(anyhow::anyhow!("subscriber error"))
    });
    cache.subscribe(EventKind::Set, |_| panic!("subscriber panic"));
    let third = order.clone();
    cache.subscribe(EventKind::Set, move |_| {
        third.lock().push("third");
        Ok(())
    });

    cache.set("k", json!(1), SetOptions::new()).await.unwrap();

    assert_eq!(*order.lock(), vec!["first", "third"]);
    assert_eq!(cache.get("k").await, Some(json!(1)));
    let errors = cache.events().take_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors[1].message.contains("subscriber panic"));
    assert_eq!(cache.stats().await.subscriber_failures, 2);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let cache = cache();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = cache.subscribe(EventKind::Miss, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    cache.get("a").await;
    assert!(cache.unsubscribe(id));
    cache.get("b").await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!cache.unsubscribe(id));
}

// == Introspection ==

#[tokio::test(start_paused = true)]
async fn test_introspection_queries() {
    let cache = cache();
    cache.set("user:1", json!(1), SetOptions::new()).await.unwrap();
    tokio::time::advance(ms(5)).await;
    cache.set("user:2", json!(2), SetOptions::new()).await.unwrap();
    cache.set("post:1", json!(3), SetOptions::new()).await.unwrap();
    for _ in 0..3 {
        cache.get("post:1").await;
    }
    cache.get("user:2").await;

    assert_eq!(cache.keys(Some("user:*")).await.unwrap(), vec!["user:1", "user:2"]);
    assert!(matches!(
        cache.keys(Some("[")).await,
        Ok(keys) if keys.is_empty()
    ));

    let top = cache.top_keys(1).await;
    assert_eq!(top[0].key, "post:1");
    assert_eq!(top[0].access_count, 3);
    assert_eq!(cache.least_accessed_keys(1).await[0].key, "user:1");
    assert_eq!(cache.keys_by_age().await[0].key, "user:1");
}

#[tokio::test]
async fn test_hit_rate_matches_formula() {
    let cache = cache();
    cache.set("k", json!(1), SetOptions::new()).await.unwrap();
    for key in ["k", "k", "k", "x"] {
        cache.get(key).await;
    }

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(
        stats.hit_rate,
        stats.hits as f64 / (stats.hits + stats.misses) as f64 * 100.0
    );
}

// == Persistence ==

#[tokio::test]
async fn test_persistence_adapter_is_notified() {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Cache::with_persistence(CacheConfig::default(), adapter.clone());

    cache
        .set("a", json!(1), SetOptions::new().ttl(Duration::from_secs(30)))
        .await
        .unwrap();
    cache.set("b", json!(2), SetOptions::new()).await.unwrap();
    cache.flush_persistence().await;
    assert_eq!(adapter.get("a").await.unwrap(), Some(json!(1)));
    assert_eq!(adapter.ttl_of("a"), Some(Duration::from_secs(30)));

    cache.delete("a").await;
    cache.flush_persistence().await;
    assert_eq!(adapter.get("a").await.unwrap(), None);

    cache.clear().await;
    cache.flush_persistence().await;
    assert!(adapter.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistence_follows_store_order() {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Cache::with_persistence(CacheConfig::default(), adapter.clone());

    for round in 0..50 {
        let key = format!("k{}", round);
        cache.set(&key, json!(round), SetOptions::new()).await.unwrap();
        cache.delete(&key).await;
        cache.set(&key, json!(round + 1), SetOptions::new()).await.unwrap();
        cache.clear().await;
        cache.set("last", json!(round), SetOptions::new()).await.unwrap();
    }
    cache.flush_persistence().await;

    assert_eq!(adapter.len(), 1);
    assert_eq!(adapter.get("last").await.unwrap(), Some(json!(49)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_leave_adapter_matching_store() {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Cache::with_persistence(CacheConfig::default(), adapter.clone());

    let writers: Vec<_> = (0..8)
        .map(|writer| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    let key = format!("w{}:{}", writer, i % 4);
                    cache.set(&key, json!(i), SetOptions::new()).await.unwrap();
                    if i % 3 == 0 {
                        cache.delete(&key).await;
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }
    cache.flush_persistence().await;

    for writer in 0..8 {
        for slot in 0..4 {
            let key = format!("w{}:{}", writer, slot);
            assert_eq!(adapter.get(&key).await.unwrap(), cache.get(&key).await, "{}", key);
        }
    }
}

#[tokio::test]
async fn test_destroy_closes_persistence_queue() {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Cache::with_persistence(CacheConfig::default(), adapter.clone());
    cache.set("a", json!(1), SetOptions::new()).await.unwrap();
    cache.flush_persistence().await;

    cache.destroy().await;
    cache.set("b", json!(2), SetOptions::new()).await.unwrap();
    cache.flush_persistence().await;

    assert_eq!(adapter.get("a").await.unwrap(), Some(json!(1)));
    assert_eq!(adapter.get("b").await.unwrap(), None);
}

#[test]
fn test_persistence_without_runtime_is_disabled() {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Cache::with_persistence(CacheConfig::default(), adapter.clone());

    let mut set = tokio_test::task::spawn(cache.set("k", json!(1), SetOptions::new()));
    assert_ready_ok!(set.poll());
    drop(set);
    let mut get = tokio_test::task::spawn(cache.get("k"));
    assert_eq!(assert_ready!(get.poll()), Some(json!(1)));

    assert!(adapter.is_empty());
}
