//! 失效集成测试
//!
//! 测试关联索引的级联清理与两次删除

use crate::common::*;
use klcache::{CacheError, Expiry, KeyTtl, RemoteStore};
use std::time::Duration;

/// 缓存 authors / books / reviews 的全部记录
async fn warm_up(fixture: &Fixture) {
    let engine = &fixture.engine;
    engine
        .save_cache(
            "authors",
            &[author("a1", "Ann"), author("a2", "Bob")],
            Expiry::Default,
        )
        .await
        .unwrap();
    engine
        .save_cache(
            "books",
            &[
                book("b1", "Rust", "a1"),
                book("b2", "Go", "a2"),
                book("b3", "Zig", "a1"),
                book("b4", "Nim", "a2"),
            ],
            Expiry::Default,
        )
        .await
        .unwrap();
    engine
        .save_cache(
            "reviews",
            &[review("r1", "b1", 5), review("r2", "b2", 3)],
            Expiry::Default,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_clean_removes_entry_and_index() {
    let fixture = Fixture::new();
    warm_up(&fixture).await;

    fixture
        .engine
        .clean_now("books", &ids(&["b2"]))
        .await
        .unwrap();

    assert!(!fixture.store.contains_key("klc:cache:entry:books:b2"));
    assert!(!fixture.store.contains_key("klc:cache:related:books:b2"));
    // 引用 b2 的书评随之失效
    assert!(!fixture.store.contains_key("klc:cache:entry:reviews:r2"));
    assert!(fixture.store.contains_key("klc:cache:entry:reviews:r1"));
    assert!(fixture.store.contains_key("klc:cache:entry:books:b1"));
}

/// 作者 -> 图书 -> 书评 的传递级联
#[tokio::test]
async fn test_transitive_cascade() {
    let fixture = Fixture::new();
    warm_up(&fixture).await;

    fixture
        .engine
        .clean_now("authors", &ids(&["a1"]))
        .await
        .unwrap();

    for gone in [
        "klc:cache:entry:authors:a1",
        "klc:cache:entry:books:b1",
        "klc:cache:entry:books:b3",
        "klc:cache:entry:reviews:r1",
        "klc:cache:related:authors:a1",
        "klc:cache:related:books:b1",
    ] {
        assert!(!fixture.store.contains_key(gone), "{} 应该被删除", gone);
    }
    for kept in [
        "klc:cache:entry:authors:a2",
        "klc:cache:entry:books:b2",
        "klc:cache:entry:books:b4",
        "klc:cache:entry:reviews:r2",
        "klc:cache:related:authors:a2",
    ] {
        assert!(fixture.store.contains_key(kept), "{} 不应该被删除", kept);
    }
}

/// 没有缓存过的ID和未注册的数据源都不是错误
#[tokio::test]
async fn test_clean_unknown_targets() {
    let fixture = Fixture::new();
    fixture
        .engine
        .clean_now("magazines", &ids(&["m1"]))
        .await
        .unwrap();
    fixture
        .engine
        .clean_now("books", &ids(&["nothing"]))
        .await
        .unwrap();
    assert!(fixture.store.is_empty());
}

/// 关联索引中的坏成员被跳过，其余成员照常清理
#[tokio::test]
async fn test_malformed_member_skipped() {
    let fixture = Fixture::new();
    warm_up(&fixture).await;
    fixture
        .store
        .sadd("klc:cache:related:authors:a2", &ids(&["garbage"]))
        .await
        .unwrap();

    fixture
        .engine
        .clean_now("authors", &ids(&["a2"]))
        .await
        .unwrap();

    assert!(!fixture.store.contains_key("klc:cache:entry:books:b2"));
    assert!(!fixture.store.contains_key("klc:cache:entry:books:b4"));
    assert!(!fixture.store.contains_key("klc:cache:related:authors:a2"));
}

#[tokio::test]
async fn test_clean_store_error() {
    let fixture = Fixture::new();
    let engine = test_config().build_engine(
        std::sync::Arc::new(FailingStore),
        fixture.registry.clone(),
    );
    let err = engine.clean_now("books", &ids(&["b1"])).await.unwrap_err();
    assert!(matches!(err, CacheError::StorageError(_)));
}

/// 短过期的写入不会缩短其他声明方依赖的关联索引
#[tokio::test]
async fn test_short_write_keeps_index_alive() {
    let fixture = Fixture::new();
    let engine = &fixture.engine;
    engine
        .save_cache(
            "books",
            &[book("b1", "Rust", "a1")],
            Expiry::After(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    engine
        .save_cache(
            "books",
            &[book("b3", "Zig", "a1")],
            Expiry::After(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!fixture.store.contains_key("klc:cache:entry:books:b3"));
    assert!(fixture.store.contains_key("klc:cache:related:authors:a1"));

    engine.clean_now("authors", &ids(&["a1"])).await.unwrap();
    assert!(!fixture.store.contains_key("klc:cache:entry:books:b1"));
}

/// 永不过期的写入让关联索引也永不过期
#[tokio::test]
async fn test_infinite_write_persists_index() {
    let fixture = Fixture::new();
    let engine = &fixture.engine;
    engine
        .save_cache(
            "books",
            &[book("b3", "Zig", "a1")],
            Expiry::After(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    engine
        .save_cache("books", &[book("b1", "Rust", "a1")], Expiry::Infinite)
        .await
        .unwrap();
    assert_eq!(
        fixture
            .store
            .pttl("klc:cache:related:authors:a1")
            .await
            .unwrap(),
        KeyTtl::Persistent
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    engine.clean_now("authors", &ids(&["a1"])).await.unwrap();
    assert!(!fixture.store.contains_key("klc:cache:entry:books:b1"));
}

/// 第二次删除清掉两次删除之间写回的旧值
#[tokio::test]
async fn test_double_delete_removes_stale_repopulation() {
    let fixture = Fixture::new();
    warm_up(&fixture).await;

    let handle = fixture.engine.clean("books", &ids(&["b1"]));
    assert!(wait_for_absent(&fixture.store, "klc:cache:entry:books:b1").await);

    // 并发读取在第一次删除之后写回了旧值
    fixture
        .engine
        .save_cache("books", &[book("b1", "Rust", "a1")], Expiry::Default)
        .await
        .unwrap();
    assert!(fixture.store.contains_key("klc:cache:entry:books:b1"));

    handle.await.unwrap();
    assert!(!fixture.store.contains_key("klc:cache:entry:books:b1"));
    assert!(!fixture.store.contains_key("klc:cache:entry:reviews:r1"));
}

/// 清理之后读取得到数据源中的新值
#[tokio::test]
async fn test_read_after_clean_sees_update() {
    let fixture = Fixture::new();
    let first: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(first[0].title, "Rust");
    assert!(wait_for_key(&fixture.store, "klc:cache:entry:books:b1").await);

    fixture.books.upsert(book("b1", "Rust 2024", "a1"));
    let stale: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(stale[0].title, "Rust");

    fixture.engine.clean("books", &ids(&["b1"])).await.unwrap();
    let fresh: Vec<Book> = fixture
        .engine
        .batch_get("books", &ids(&["b1"]), Expiry::Default)
        .await
        .unwrap();
    assert_eq!(fresh[0].title, "Rust 2024");
    assert!(wait_for_key(&fixture.store, "klc:cache:entry:books:b1").await);
    assert_eq!(
        fixture.cached::<Book>("klc:cache:entry:books:b1").await,
        Some(book("b1", "Rust 2024", "a1"))
    );
}
