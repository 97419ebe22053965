mod common;

use tiercache_bus::cache::GetOrSetOptions;

#[tokio::test]
async fn get_or_set_on_a_true_miss_calls_the_loader_and_caches_the_result() {
    let cache = common::single_tier_cache();
    let opts = GetOrSetOptions::default();

    let value = cache
        .get_or_set("k", |_cancel| async { Ok::<_, anyhow::Error>("computed".to_string()) }, &opts)
        .await
        .unwrap();
    assert_eq!(value, "computed");
    assert_eq!(cache.get::<String>("k").await, Some("computed".to_string()));
}

#[tokio::test]
async fn delete_removes_a_cached_key() {
    let cache = common::single_tier_cache();
    let opts = GetOrSetOptions::default();
    cache.set("k", 1u32, &opts).await.unwrap();
    assert!(cache.has("k").await);

    let removed = cache.delete(&["k".to_string()]).await;
    assert_eq!(removed, 1);
    assert!(!cache.has("k").await);
}

#[tokio::test]
async fn tag_invalidation_removes_every_key_sharing_a_tag() {
    let cache = common::single_tier_cache();
    let mut opts = GetOrSetOptions::default();
    opts.tags = vec!["users".to_string()];
    cache.set("user:1", 1u32, &opts).await.unwrap();
    cache.set("user:2", 2u32, &opts).await.unwrap();

    let count = cache.invalidate_tags(&["users".to_string()]).await;
    assert_eq!(count, 2);
    assert!(!cache.has("user:1").await);
    assert!(!cache.has("user:2").await);
}

#[tokio::test]
async fn clear_drops_everything_including_tags() {
    let cache = common::single_tier_cache();
    let mut opts = GetOrSetOptions::default();
    opts.tags = vec!["t".to_string()];
    cache.set("k", 1u32, &opts).await.unwrap();

    cache.clear().await;
    assert!(!cache.has("k").await);
    assert_eq!(cache.invalidate_tags(&["t".to_string()]).await, 0);
}
