use cellrate::{Limit, Limiter};
use cellrate_redis::{RedisStore, RedisStoreConfig};
use std::sync::Arc;
use std::time::Duration;

// Requires Redis running. If CELLRATE_TEST_REDIS_URL is unset, the tests skip.
fn redis_url() -> Option<String> {
    match std::env::var("CELLRATE_TEST_REDIS_URL") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("skipping: set CELLRATE_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379/0)");
            None
        }
    }
}

async fn limiter(url: &str, connection_count: usize) -> Limiter<RedisStore> {
    let config = RedisStoreConfig { url: url.to_string(), connection_count, ..Default::default() };
    let store = RedisStore::connect(&config)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to redis at '{}': {}", url, e));
    let prefix = format!("cellrate_test_{}:", rand::random::<u64>());
    Limiter::new(store).with_prefix(prefix)
}

fn assert_close(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = if actual > expected { actual - expected } else { expected - actual };
    assert!(diff <= tolerance, "{:?} not within {:?} of {:?}", actual, tolerance, expected);
}

#[tokio::test]
async fn allow_sequence_matches_gcra() {
    let Some(url) = redis_url() else { return };
    let limiter = limiter(&url, 1).await;
    let limit = Limit::per_second(10);

    let d = limiter.allow("test_id", &limit).await.expect("allow");
    assert!(d.allowed);
    assert_eq!(d.remaining, 9);
    assert_eq!(d.retry_after, None);
    assert_close(d.reset_after, Duration::from_millis(100), Duration::from_millis(10));

    let d = limiter.allow_n("test_id", &limit, 2).await.expect("allow_n");
    assert!(d.allowed);
    assert_eq!(d.remaining, 7);
    assert_eq!(d.retry_after, None);
    assert_close(d.reset_after, Duration::from_millis(300), Duration::from_millis(50));

    let first = limiter.allow_n("test_id", &limit, 1000).await.expect("overflow");
    assert!(!first.allowed);
    assert_eq!(first.remaining, 0);
    assert_close(first.retry_after.unwrap(), Duration::from_secs(99), Duration::from_secs(1));
    assert_close(first.reset_after, Duration::from_millis(300), Duration::from_millis(50));

    let second = limiter.allow_n("test_id", &limit, 1000).await.expect("overflow again");
    assert!(!second.allowed);
    assert_close(
        second.retry_after.unwrap(),
        first.retry_after.unwrap(),
        Duration::from_millis(50),
    );
}

#[tokio::test]
async fn state_expires_back_to_cold() {
    let Some(url) = redis_url() else { return };
    let limiter = limiter(&url, 1).await;
    let limit = Limit::per_second(20);

    let d = limiter.allow_n("k", &limit, 20).await.unwrap();
    assert!(d.allowed);
    assert!(!limiter.allow("k", &limit).await.unwrap().allowed);

    tokio::time::sleep(d.reset_after + Duration::from_millis(50)).await;
    let d = limiter.allow("k", &limit).await.unwrap();
    assert!(d.allowed);
    assert_eq!(d.remaining, 19);
}

#[tokio::test]
async fn concurrent_callers_share_one_bucket() {
    let Some(url) = redis_url() else { return };
    let limiter = Arc::new(limiter(&url, 4).await);
    let limit = Limit::per_hour(50);

    let handles: Vec<_> = (0..150)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("shared", &limit).await.unwrap() })
        })
        .collect();
    let decisions: Vec<_> =
        futures::future::join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(decisions.iter().filter(|d| d.allowed).count(), 50);
}
