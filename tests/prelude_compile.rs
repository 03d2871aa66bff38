//! Compile-time prelude coverage test (middleware-focused).
use cellrate::prelude::*;
use std::time::Duration;
use tower::service_fn;
use tower_layer::Layer;
use tower_service::Service;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let store = InMemoryStore::with_clock(ManualClock::new(Duration::from_secs(1)));
    let limiter: Limiter<InMemoryStore> = Limiter::new(store);
    let limit = Limit::per_second(1);
    let layer = RateLimitLayer::new(limiter, limit, |_req: &()| "unit".to_string());

    let mut svc = layer.layer(service_fn(|_req: ()| async { Ok::<_, std::io::Error>(()) }));
    svc.call(()).await.expect("first call is within the limit");
    let err = svc.call(()).await.expect_err("second call exceeds the limit");
    assert!(matches!(err, RateLimitError::Limited(Decision { allowed: false, .. })));
}
