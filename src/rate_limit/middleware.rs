use crate::error::LimiterError;
use crate::rate_limit::store::GcraStore;
use crate::rate_limit::{Decision, Limiter};
use crate::Limit;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Error returned by [`RateLimitService`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError<E, S> {
    /// The request's key is over its limit.
    #[error("rate limited; retry after {:?}", .0.retry_after)]
    Limited(Decision),
    /// The limiter could not decide (store down, malformed reply, invalid key).
    #[error("rate limiter failed: {0}")]
    Limiter(#[source] LimiterError<S>),
    /// The underlying service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E, S> RateLimitError<E, S> {
    /// The denial decision, if the request was rate limited.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Limited(d) => Some(d),
            _ => None,
        }
    }

    /// Check if this error is a rate limit denial.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited(_))
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A layer that enforces a [`Limit`] per request key using a [`Limiter`].
///
/// `key_fn` maps each request to the key it is limited under (user id, client IP,
/// route). Each request costs one unit.
pub struct RateLimitLayer<St, K> {
    limiter: Limiter<St>,
    limit: Limit,
    key_fn: Arc<K>,
}

impl<St, K> Clone for RateLimitLayer<St, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), limit: self.limit, key_fn: self.key_fn.clone() }
    }
}

impl<St, K> fmt::Debug for RateLimitLayer<St, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("prefix", &self.limiter.prefix())
            .field("limit", &self.limit)
            .finish()
    }
}

impl<St, K> RateLimitLayer<St, K> {
    /// Create a new rate limit layer.
    pub fn new(limiter: Limiter<St>, limit: Limit, key_fn: K) -> Self {
        Self { limiter, limit, key_fn: Arc::new(key_fn) }
    }
}

impl<Svc, St, K> Layer<Svc> for RateLimitLayer<St, K> {
    type Service = RateLimitService<Svc, St, K>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            limit: self.limit,
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<Svc, St, K> {
    inner: Svc,
    limiter: Limiter<St>,
    limit: Limit,
    key_fn: Arc<K>,
}

impl<Svc: Clone, St, K> Clone for RateLimitService<Svc, St, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            limit: self.limit,
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<Svc: fmt::Debug, St, K> fmt::Debug for RateLimitService<Svc, St, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("prefix", &self.limiter.prefix())
            .field("limit", &self.limit)
            .finish()
    }
}

impl<Svc, St, K, Req> Service<Req> for RateLimitService<Svc, St, K>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    St: GcraStore + 'static,
    K: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = RateLimitError<Svc::Error, St::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RateLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);
        let limiter = self.limiter.clone();
        let limit = self.limit;
        // The clone may not be ready; swap so the readied service handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.allow(&key, &limit).await {
                Ok(decision) if decision.allowed => {
                    inner.call(req).await.map_err(RateLimitError::Inner)
                }
                Ok(decision) => Err(RateLimitError::Limited(decision)),
                Err(e) => Err(RateLimitError::Limiter(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::store::InMemoryStore;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn layer(rate: u32) -> RateLimitLayer<InMemoryStore, impl Fn(&String) -> String> {
        let store = InMemoryStore::with_clock(ManualClock::new(std::time::Duration::from_secs(5)));
        RateLimitLayer::new(Limiter::new(store), Limit::per_second(rate), |req: &String| req.clone())
    }

    #[tokio::test]
    async fn forwards_until_limited_per_key() {
        let svc = ServiceBuilder::new()
            .layer(layer(2))
            .service(service_fn(|req: String| async move { Ok::<_, Infallible>(req.len()) }));

        assert_eq!(svc.clone().oneshot("alice".to_string()).await.unwrap(), 5);
        assert_eq!(svc.clone().oneshot("alice".to_string()).await.unwrap(), 5);

        let err = svc.clone().oneshot("alice".to_string()).await.unwrap_err();
        assert!(err.is_limited());
        assert_eq!(err.decision().unwrap().remaining, 0);
        assert!(err.decision().unwrap().retry_after.is_some());

        // other keys are unaffected
        assert_eq!(svc.oneshot("bob".to_string()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn limiter_failure_is_not_a_decision() {
        let svc = ServiceBuilder::new()
            .layer(layer(2))
            .service(service_fn(|req: String| async move { Ok::<_, Infallible>(req) }));

        let err = svc.oneshot(String::new()).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Limiter(ref e) if e.is_invalid_request()));
        assert!(err.decision().is_none());
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let svc = ServiceBuilder::new().layer(layer(5)).service(service_fn(|_req: String| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        }));

        let err = svc.oneshot("k".to_string()).await.unwrap_err();
        assert_eq!(err.into_inner().unwrap().to_string(), "boom");
    }
}
