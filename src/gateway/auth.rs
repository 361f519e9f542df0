use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// A freshly acquired gateway token. `expires_in` is the gateway's own claim,
/// which the cache caps at its configured lifetime.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

/// The authentication call itself, behind a seam so tests can inject fakes.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, ServiceError>;
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

type AuthFlight = Shared<BoxFuture<'static, Result<CachedToken, ServiceError>>>;

#[derive(Default)]
struct Inner {
    cached: Option<CachedToken>,
    in_flight: Option<AuthFlight>,
}

/// Process-wide bearer-token cache with single-flight acquisition: concurrent
/// callers during an in-flight authentication await the same shared future
/// instead of issuing duplicate auth requests. A failed acquisition clears the
/// cache and hands every waiter the same error.
pub struct GatewayAuthCache {
    source: Arc<dyn TokenSource>,
    lifetime: Duration,
    safety_margin: Duration,
    inner: Mutex<Inner>,
}

impl GatewayAuthCache {
    pub fn new(source: Arc<dyn TokenSource>, lifetime: Duration, safety_margin: Duration) -> Self {
        Self {
            source,
            lifetime,
            safety_margin,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns a token valid for at least the safety margin, authenticating
    /// if necessary.
    pub async fn token(&self) -> Result<String, ServiceError> {
        let flight = {
            let mut inner = self.lock();
            if let Some(cached) = &inner.cached {
                if Instant::now() + self.safety_margin < cached.expires_at {
                    return Ok(cached.access_token.clone());
                }
                debug!("cached gateway token is within its safety margin, refreshing");
                inner.cached = None;
            }
            match &inner.in_flight {
                Some(flight) => flight.clone(),
                None => {
                    let source = self.source.clone();
                    let lifetime = self.lifetime;
                    let flight = async move {
                        let token = source.authenticate().await?;
                        let ttl = token
                            .expires_in
                            .map(|claimed| claimed.min(lifetime))
                            .unwrap_or(lifetime);
                        Ok(CachedToken {
                            access_token: token.access_token,
                            expires_at: Instant::now() + ttl,
                        })
                    }
                    .boxed()
                    .shared();
                    inner.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.await;

        let mut inner = self.lock();
        inner.in_flight = None;
        match result {
            Ok(token) => {
                let access = token.access_token.clone();
                inner.cached = Some(token);
                Ok(access)
            }
            Err(err) => {
                warn!(error = %err, "gateway authentication failed");
                inner.cached = None;
                Err(err)
            }
        }
    }

    /// Drops the cached token, forcing the next caller to re-authenticate.
    /// Called when the gateway answers 401 to a supposedly valid token.
    pub fn invalidate(&self) {
        self.lock().cached = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: AtomicU32,
        fail: bool,
        expires_in: Option<Duration>,
    }

    impl CountingSource {
        fn new(fail: bool, expires_in: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
                expires_in,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn authenticate(&self) -> Result<AuthToken, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Let concurrent callers pile up on the in-flight request.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(ServiceError::GatewayUnreachable("auth down".to_string()));
            }
            Ok(AuthToken {
                access_token: format!("token-{}", n),
                expires_in: self.expires_in,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_auth_request() {
        let source = CountingSource::new(false, None);
        let cache = Arc::new(GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(3300),
            Duration::from_secs(60),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.token().await }));
        }
        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(tokens.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn cached_token_is_reused_until_safety_margin() {
        let source = CountingSource::new(false, None);
        let cache = GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(3300),
            Duration::from_secs(60),
        );

        assert_eq!(cache.token().await.unwrap(), "token-1");
        assert_eq!(cache.token().await.unwrap(), "token-1");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_refreshes_after_expiry() {
        let source = CountingSource::new(false, None);
        let cache = GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(100),
            Duration::from_secs(10),
        );

        assert_eq!(cache.token().await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(95)).await;
        assert_eq!(cache.token().await.unwrap(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_propagates_to_all_waiters_and_clears_cache() {
        let source = CountingSource::new(true, None);
        let cache = Arc::new(GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(3300),
            Duration::from_secs(60),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.token().await }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ServiceError::GatewayUnreachable(_)));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reauthentication() {
        let source = CountingSource::new(false, None);
        let cache = GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(3300),
            Duration::from_secs(60),
        );

        assert_eq!(cache.token().await.unwrap(), "token-1");
        cache.invalidate();
        assert_eq!(cache.token().await.unwrap(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn gateway_claimed_expiry_is_capped_at_configured_lifetime() {
        let source = CountingSource::new(false, Some(Duration::from_secs(24 * 3600)));
        let cache = GatewayAuthCache::new(
            source.clone(),
            Duration::from_secs(100),
            Duration::from_secs(10),
        );
        assert_eq!(cache.token().await.unwrap(), "token-1");
        // The 24h claim must not extend the cache beyond its 100s lifetime.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 1);
    }
}
