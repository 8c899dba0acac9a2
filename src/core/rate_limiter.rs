//! Keyed rate limiter registry built atop `governor`.
//!
//! The registry owns two independent pools, one keyed by client network
//! address and one keyed by canonical resource identifier. Each pool is a
//! single keyed governor limiter: the first observation of a key lazily
//! creates its bucket and consumes a permit in the same atomic step, so two
//! concurrent callers can never end up with two buckets for one key. Keys live
//! in a sharded concurrent map, so unrelated keys do not contend.
//!
//! The quota is GCRA with one permit refilled per `period` and a burst cap of
//! `burst`, which behaves exactly like a token bucket of that shape.
use std::{num::NonZeroU32, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
};
use thiserror::Error;

use crate::config::models::{PoolQuotaConfig, RateLimitSettings};

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// The two limiter pools of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterPool {
    /// Requests per client network address.
    ClientAddress,
    /// Requests per canonical resource identifier.
    ResourceId,
}

impl LimiterPool {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterPool::ClientAddress => "client_address",
            LimiterPool::ResourceId => "resource_id",
        }
    }
}

impl std::fmt::Display for LimiterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("invalid period '{period}' for pool {pool}: {reason}")]
    InvalidPeriod {
        pool: LimiterPool,
        period: String,
        reason: String,
    },

    #[error("burst for pool {pool} must be greater than 0")]
    ZeroBurst { pool: LimiterPool },
}

/// Resolved quota of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolQuota {
    pub burst: NonZeroU32,
    pub period: Duration,
}

impl PoolQuota {
    pub fn new(burst: NonZeroU32, period: Duration) -> Self {
        Self { burst, period }
    }

    fn from_config(pool: LimiterPool, config: &PoolQuotaConfig) -> Result<Self, RegistryError> {
        let period = humantime::parse_duration(&config.period).map_err(|e| {
            RegistryError::InvalidPeriod {
                pool,
                period: config.period.clone(),
                reason: e.to_string(),
            }
        })?;
        let burst = NonZeroU32::new(config.burst).ok_or(RegistryError::ZeroBurst { pool })?;
        Ok(Self { burst, period })
    }

    fn to_governor(self, pool: LimiterPool) -> Result<Quota, RegistryError> {
        Quota::with_period(self.period)
            .map(|quota| quota.allow_burst(self.burst))
            .ok_or_else(|| RegistryError::InvalidPeriod {
                pool,
                period: format!("{:?}", self.period),
                reason: "period must be greater than zero".to_string(),
            })
    }
}

/// Registry of keyed limiters, one pool per [`LimiterPool`].
///
/// Owned by the application instance and shared by reference (`Arc`) with the
/// admission layer; nothing in the crate keeps limiter state in globals.
pub struct RateLimiterRegistry {
    client: KeyedRateLimiterImpl<String>,
    resource: KeyedRateLimiterImpl<String>,
    max_tracked_keys: usize,
}

impl RateLimiterRegistry {
    /// Build both pools from explicit quotas.
    pub fn new(
        client: PoolQuota,
        resource: PoolQuota,
        max_tracked_keys: usize,
    ) -> Result<Self, RegistryError> {
        let client_quota = client.to_governor(LimiterPool::ClientAddress)?;
        let resource_quota = resource.to_governor(LimiterPool::ResourceId)?;

        tracing::info!(
            client_burst = client.burst.get(),
            client_period = ?client.period,
            resource_burst = resource.burst.get(),
            resource_period = ?resource.period,
            max_tracked_keys,
            "Creating rate limiter registry"
        );

        Ok(Self {
            client: RateLimiter::keyed(client_quota),
            resource: RateLimiter::keyed(resource_quota),
            max_tracked_keys,
        })
    }

    /// Build both pools from the `rate_limit` configuration section.
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, RegistryError> {
        let client = PoolQuota::from_config(LimiterPool::ClientAddress, &settings.client)?;
        let resource = PoolQuota::from_config(LimiterPool::ResourceId, &settings.resource)?;
        Self::new(client, resource, settings.max_tracked_keys)
    }

    fn pool(&self, pool: LimiterPool) -> &KeyedRateLimiterImpl<String> {
        match pool {
            LimiterPool::ClientAddress => &self.client,
            LimiterPool::ResourceId => &self.resource,
        }
    }

    /// Look up (or lazily create) the bucket for `key` in `pool` and try to
    /// consume one permit from it.
    pub fn allow(&self, pool: LimiterPool, key: &str) -> bool {
        let allowed = self.pool(pool).check_key(&key.to_string()).is_ok();
        if !allowed {
            tracing::debug!(pool = %pool, key, "Rate limit exceeded");
        }
        allowed
    }

    /// Number of keys currently holding a bucket in `pool`.
    pub fn tracked_keys(&self, pool: LimiterPool) -> usize {
        self.pool(pool).len()
    }

    /// Drop buckets that have fully refilled and release the freed capacity.
    ///
    /// A fully refilled bucket is indistinguishable from a missing one, so this
    /// never changes the outcome of a later `allow` call.
    pub fn housekeep(&self) {
        for pool in [LimiterPool::ClientAddress, LimiterPool::ResourceId] {
            let limiter = self.pool(pool);
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            let after = limiter.len();

            tracing::debug!(pool = %pool, before, after, "Limiter housekeeping finished");
            if after > self.max_tracked_keys {
                tracing::warn!(
                    pool = %pool,
                    tracked = after,
                    max_tracked_keys = self.max_tracked_keys,
                    "Limiter pool exceeds its key budget with only active buckets left"
                );
            }
        }
    }

    /// Run [`housekeep`](Self::housekeep) forever on a fixed interval.
    pub async fn run_housekeeping(self: std::sync::Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.housekeep();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn quota(burst: u32, period: Duration) -> PoolQuota {
        PoolQuota::new(NonZeroU32::new(burst).unwrap(), period)
    }

    fn registry(client_burst: u32, resource_burst: u32) -> RateLimiterRegistry {
        RateLimiterRegistry::new(
            quota(client_burst, Duration::from_secs(60)),
            quota(resource_burst, Duration::from_secs(60)),
            1_000,
        )
        .unwrap()
    }

    #[test]
    fn test_burst_is_granted_then_denied() {
        for burst in [1, 2, 5, 15] {
            let registry = registry(burst, burst);
            for i in 0..burst {
                assert!(
                    registry.allow(LimiterPool::ResourceId, "bafy-key"),
                    "request {} of burst {} should pass",
                    i + 1,
                    burst
                );
            }
            assert!(!registry.allow(LimiterPool::ResourceId, "bafy-key"));
        }
    }

    #[test]
    fn test_keys_do_not_share_state() {
        let registry = registry(2, 2);
        assert!(registry.allow(LimiterPool::ClientAddress, "10.0.0.1"));
        assert!(registry.allow(LimiterPool::ClientAddress, "10.0.0.1"));
        assert!(!registry.allow(LimiterPool::ClientAddress, "10.0.0.1"));

        assert!(registry.allow(LimiterPool::ClientAddress, "10.0.0.2"));
        assert_eq!(registry.tracked_keys(LimiterPool::ClientAddress), 2);
    }

    #[test]
    fn test_pools_are_independent() {
        let registry = registry(1, 1);
        assert!(registry.allow(LimiterPool::ClientAddress, "same"));
        assert!(!registry.allow(LimiterPool::ClientAddress, "same"));
        // identical key string in the other pool is a different bucket
        assert!(registry.allow(LimiterPool::ResourceId, "same"));
        assert_eq!(registry.tracked_keys(LimiterPool::ResourceId), 1);
    }

    #[tokio::test]
    async fn test_permit_refills_after_period() {
        let registry = RateLimiterRegistry::new(
            quota(1, Duration::from_millis(50)),
            quota(1, Duration::from_millis(50)),
            1_000,
        )
        .unwrap();

        assert!(registry.allow(LimiterPool::ClientAddress, "k"));
        assert!(!registry.allow(LimiterPool::ClientAddress, "k"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.allow(LimiterPool::ClientAddress, "k"));
    }

    #[tokio::test]
    async fn test_housekeeping_evicts_only_refilled_buckets() {
        let registry = RateLimiterRegistry::new(
            quota(1, Duration::from_millis(50)),
            quota(1, Duration::from_secs(600)),
            1_000,
        )
        .unwrap();

        assert!(registry.allow(LimiterPool::ClientAddress, "idle"));
        assert!(registry.allow(LimiterPool::ResourceId, "busy"));
        tokio::time::sleep(Duration::from_millis(80)).await;

        registry.housekeep();
        assert_eq!(registry.tracked_keys(LimiterPool::ClientAddress), 0);
        assert_eq!(registry.tracked_keys(LimiterPool::ResourceId), 1);
        // the surviving bucket is still exhausted
        assert!(!registry.allow(LimiterPool::ResourceId, "busy"));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_bucket() {
        let registry = Arc::new(registry(10, 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| registry.allow(LimiterPool::ResourceId, "hot"))
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
        assert_eq!(registry.tracked_keys(LimiterPool::ResourceId), 1);
    }

    #[test]
    fn test_from_settings_rejects_bad_quota() {
        let mut settings = RateLimitSettings::default();
        settings.resource.period = "whenever".to_string();
        assert!(matches!(
            RateLimiterRegistry::from_settings(&settings),
            Err(RegistryError::InvalidPeriod {
                pool: LimiterPool::ResourceId,
                ..
            })
        ));

        let mut settings = RateLimitSettings::default();
        settings.client.burst = 0;
        assert!(matches!(
            RateLimiterRegistry::from_settings(&settings),
            Err(RegistryError::ZeroBurst {
                pool: LimiterPool::ClientAddress
            })
        ));
    }

    #[test]
    fn test_default_settings_match_gateway_budgets() {
        let registry = RateLimiterRegistry::from_settings(&RateLimitSettings::default()).unwrap();
        for _ in 0..100 {
            assert!(registry.allow(LimiterPool::ClientAddress, "203.0.113.9"));
        }
        assert!(!registry.allow(LimiterPool::ClientAddress, "203.0.113.9"));

        for _ in 0..15 {
            assert!(registry.allow(LimiterPool::ResourceId, "QmHash"));
        }
        assert!(!registry.allow(LimiterPool::ResourceId, "QmHash"));
    }
}
