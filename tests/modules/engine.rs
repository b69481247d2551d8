//! 缓存引擎集成测试
//!
//! 测试批量读取的顺序、部分命中、写回以及错误传播

use crate::common::*;
use klcache::{
    CacheEngine, CacheError, Condition, DataSourceRegistry, Expiry, RemoteStore, SharedDataSource,
};
use std::sync::Arc;
use std::time::Duration;

/// 结果按请求顺序排列，去重且不存在的ID缺席
#[tokio::test]
async fn test_batch_get_preserves_request_order() {
    let fixture = Fixture::new();
    let request = ids(&["b3", "missing", "b1", "b3", "b2"]);

    let books: Vec<Book> = fixture
        .engine
        .batch_get("books", &request, Expiry::Default)
        .await
        .unwrap();

    let order: Vec<_> = books.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(order, vec!["b3", "b1", "b2"]);
    // 重复ID只查询一次
    assert_eq!(fixture.books.calls(), vec![ids(&["b3", "missing", "b1", "b2"])]);
}

/// 只有未命中的ID到达数据源，顺序与命中情况无关
#[tokio::test]
async fn test_mixed_hit_and_miss() {
    let fixture = Fixture::new();
    fixture
        .engine
        .save_cache(
            "books",
            &[book("b1", "Rust", "a1"), book("b3", "Zig", "a1")],
            Expiry::Default,
        )
        .await
        .unwrap();

    let books: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b4", "b3", "b2", "b1"]), Expiry::Default)
        .await
        .unwrap();

    let order: Vec<_> = books.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(order, vec!["b4", "b3", "b2", "b1"]);
    assert_eq!(fixture.books.calls(), vec![ids(&["b4", "b2"])]);
}

/// 全部命中时不访问数据源
#[tokio::test]
async fn test_all_hits_skip_data_source() {
    let fixture = Fixture::new();
    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b2"]), Expiry::Default)
        .await
        .unwrap();
    assert!(wait_for_key(&fixture.store, "klc:cache:entry:books:b2").await);
    fixture.books.reset_calls();

    let books: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b2", "b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(books.len(), 2);
    assert_eq!(fixture.books.call_count(), 0);
}

/// 数据源故障时仍能从缓存返回
#[tokio::test]
async fn test_cached_value_survives_data_source_failure() {
    let fixture = Fixture::new();
    let first: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(first, vec![book("b1", "Rust", "a1")]);
    assert!(wait_for_key(&fixture.store, "klc:cache:entry:books:b1").await);

    fixture.books.set_failing(true);
    let second: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(second, first);
}

/// 数据源错误原样返回
#[tokio::test]
async fn test_data_source_error_aborts_call() {
    let fixture = Fixture::new();
    fixture.books.set_failing(true);

    let err = fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b2"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::DataSourceError(_)));
}

/// 按分段大小拆分查询，任一段失败时整个调用失败
#[tokio::test]
async fn test_segmented_fetch() {
    let fixture = Fixture::with_config(test_config().segment_size(2));
    let books: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1", "b2", "b3"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(books.len(), 3);
    assert_eq!(fixture.books.calls(), vec![ids(&["b1", "b2"]), ids(&["b3"])]);

    let fixture = Fixture::with_config(test_config().segment_size(1));
    fixture.books.set_failing(true);
    let err = fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b2", "b3"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::DataSourceError(_)));
    // 第一段失败后不再查询后续分段
    assert_eq!(fixture.books.call_count(), 1);
}

#[tokio::test]
async fn test_empty_request() {
    let fixture = Fixture::new();
    let books: Vec<Book> = fixture
        .engine
        .batch_get("books", &[], Expiry::Default)
        .await
        .unwrap();
    assert!(books.is_empty());
    assert_eq!(fixture.books.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_data_source() {
    let fixture = Fixture::new();
    let err = fixture
        .engine
        .batch_get::<Book>("magazines", &ids(&["m1"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownDataSource(name) if name == "magazines"));
}

#[tokio::test]
async fn test_type_mismatch() {
    let fixture = Fixture::new();
    let err = fixture
        .engine
        .batch_get::<Author>("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::DataSourceTypeMismatch(_)));
}

/// 存储故障在读路径上直接返回，不回退到数据源
#[tokio::test]
async fn test_store_error_propagates() {
    let registry = Arc::new(DataSourceRegistry::new());
    let books = Arc::new(FakeSource::new("books").with_records([book("b1", "Rust", "a1")]));
    let shared: SharedDataSource<Book> = books.clone();
    registry.register_shared(shared);
    let engine = CacheEngine::new(Arc::new(FailingStore), registry);

    let err = engine
        .batch_get::<Book>("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::StorageError(_)));
    assert_eq!(books.call_count(), 0);
}

/// 格式错误的缓存条目是硬错误
#[tokio::test]
async fn test_malformed_entry() {
    let fixture = Fixture::new();
    fixture
        .store
        .mset(
            &[("klc:cache:entry:books:b1".to_string(), b"not json".to_vec())],
            None,
        )
        .await
        .unwrap();

    let err = fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap_err();
    assert!(
        matches!(err, CacheError::MalformedCachedEntry { ref key, .. } if key == "klc:cache:entry:books:b1")
    );
}

/// 写回使用请求的过期策略，关联索引与条目同寿
#[tokio::test]
async fn test_write_back_expiry() {
    let fixture = Fixture::new();

    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1"]), Expiry::After(Duration::from_secs(30)))
        .await
        .unwrap();
    let related = "klc:cache:related:authors:a1";
    assert!(wait_until(Duration::from_secs(2), || fixture.store.ttl(related).is_some()).await);
    let ttl = fixture.store.ttl("klc:cache:entry:books:b1").unwrap();
    assert!(ttl <= Duration::from_secs(30) && ttl > Duration::from_secs(25));

    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b2"]), Expiry::Infinite)
        .await
        .unwrap();
    assert!(wait_for_key(&fixture.store, "klc:cache:related:authors:a2").await);
    assert!(fixture.store.contains_key("klc:cache:entry:books:b2"));
    assert!(fixture.store.ttl("klc:cache:entry:books:b2").is_none());
    assert!(fixture.store.ttl("klc:cache:related:authors:a2").is_none());
}

/// 关联索引成员记录声明方的数据源和ID
#[tokio::test]
async fn test_related_index_written() {
    let fixture = Fixture::new();
    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b3"]), Expiry::Default)
        .await
        .unwrap();
    assert!(wait_for_key(&fixture.store, "klc:cache:related:authors:a1").await);

    let mut members = fixture
        .store
        .smembers("klc:cache:related:authors:a1")
        .await
        .unwrap();
    members.sort();
    assert_eq!(
        members,
        vec![
            r#"{"QuerierName":"books","RelatedIDs":["b1"]}"#,
            r#"{"QuerierName":"books","RelatedIDs":["b3"]}"#,
        ]
    );
}

#[tokio::test]
async fn test_query_by_condition() {
    let fixture = Fixture::new();
    let condition = Condition::new().filter("author_id", "a2");

    let books: Vec<Book> = fixture
        .engine
        .query("books", &condition, Expiry::Default)
        .await
        .unwrap();
    let found: Vec<_> = books.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(found, vec!["b2", "b4"]);
}

#[tokio::test]
async fn test_query_unsupported_condition() {
    let registry = Arc::new(DataSourceRegistry::new());
    let shared: SharedDataSource<Author> = Arc::new(FakeSource::<Author>::without_condition("authors"));
    registry.register_shared(shared);
    let engine = test_config().build_engine(Arc::new(klcache::MemoryStore::new()), registry);

    let err = engine
        .query::<Author>("authors", &Condition::new(), Expiry::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::UnsupportedCondition(_)));
}

/// 每次读取都记录命中率
#[tokio::test]
async fn test_hit_ratio_recorded() {
    let fixture = Fixture::new();
    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b2"]), Expiry::Default)
        .await
        .unwrap();
    assert!(wait_for_key(&fixture.store, "klc:cache:entry:books:b2").await);
    fixture
        .engine
        .batch_get::<Book>("books", &ids(&["b1", "b3"]), Expiry::Default)
        .await
        .unwrap();

    let recorder = fixture.engine.hit_ratio().clone();
    let mut ratio = recorder.current_hit_ratio().await.unwrap();
    for _ in 0..100 {
        if ratio.hit_count + ratio.miss_count == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        ratio = recorder.current_hit_ratio().await.unwrap();
    }
    assert_eq!(ratio.hit_count, 1);
    assert_eq!(ratio.miss_count, 3);
}

/// 通过注册句柄读取，类型在编译期确定，缓存与按名字读取共享
#[tokio::test]
async fn test_read_through_registered_handle() {
    let store = Arc::new(klcache::MemoryStore::new());
    let registry = Arc::new(DataSourceRegistry::new());
    let books = Arc::new(FakeSource::new("books").with_records([
        book("b1", "Rust", "a1"),
        book("b2", "Go", "a2"),
        book("b3", "Zig", "a1"),
    ]));
    let shared: SharedDataSource<Book> = books.clone();
    let handle = registry.register_shared(shared);
    let engine = test_config().build_engine(store.clone(), registry);

    let found: Vec<Book> = engine
        .batch_get_from(&handle, &ids(&["b2", "b1"]), Expiry::Default)
        .await
        .unwrap();
    let order: Vec<_> = found.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(order, vec!["b2", "b1"]);
    assert!(wait_for_key(&store, "klc:cache:entry:books:b1").await);
    assert!(wait_for_key(&store, "klc:cache:entry:books:b2").await);

    books.reset_calls();
    let cached: Vec<Book> = engine
        .batch_get("books", &ids(&["b1", "b2"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(books.call_count(), 0);

    let by_author = engine
        .query_from(&handle, &Condition::new().filter("author_id", "a1"), Expiry::Default)
        .await
        .unwrap();
    let order: Vec<_> = by_author.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(order, vec!["b1", "b3"]);
    // 只有 b3 需要回源
    assert_eq!(books.calls(), vec![ids(&["b3"])]);
}
