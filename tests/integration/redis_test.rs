//! Redis集成测试
//!
//! 运行方式：`cargo test --features redis -- --ignored`

use crate::common::*;
use klcache::{CacheConfig, DataSourceRegistry, Expiry, RedisConfig, RedisStore, RemoteStore, SharedDataSource};
use std::sync::Arc;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn redis_store() -> Arc<RedisStore> {
    let store = RedisStore::new(RedisConfig::new(redis_url())).await.unwrap();
    store.ping().await.unwrap();
    Arc::new(store)
}

#[tokio::test]
#[ignore] // 需要Redis服务器
async fn test_engine_over_redis() {
    let store = redis_store().await;
    let registry = Arc::new(DataSourceRegistry::new());
    let books = Arc::new(FakeSource::new("redis_books").with_records([
        book("rb1", "Rust", "ra1"),
        book("rb2", "Go", "ra1"),
    ]));
    let shared: SharedDataSource<Book> = books.clone();
    registry.register_shared(shared);

    let engine = CacheConfig::new()
        .clean_delay(Duration::from_millis(100))
        .build_engine(store.clone(), registry);
    engine.clean_now("redis_books", &ids(&["rb1", "rb2"])).await.unwrap();

    let first: Vec<Book> = engine
        .batch_get("redis_books", &ids(&["rb2", "rb1"]), Expiry::After(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].id, "rb2");

    tokio::time::sleep(Duration::from_millis(200)).await;
    books.reset_calls();
    let second: Vec<Book> = engine
        .batch_get("redis_books", &ids(&["rb1", "rb2"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(books.call_count(), 0);

    let members = store
        .smembers("klc:cache:related:authors:ra1")
        .await
        .unwrap();
    assert_eq!(members.len(), 2);

    engine.clean("authors", &ids(&["ra1"])).await.unwrap();
    assert_eq!(
        store.get("klc:cache:entry:redis_books:rb1").await.unwrap(),
        None
    );
    assert!(store
        .smembers("klc:cache:related:authors:ra1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[ignore] // 需要Redis服务器
async fn test_hit_ratio_over_redis() {
    let store = redis_store().await;
    let recorder = klcache::HitRatioRecorder::new(store);
    let before = recorder.current_hit_ratio().await.unwrap();
    recorder.add_hit_ratio(3, 1).await;
    let after = recorder.current_hit_ratio().await.unwrap();
    assert_eq!(after.hit_count - before.hit_count, 3);
    assert_eq!(after.miss_count - before.miss_count, 1);
}
