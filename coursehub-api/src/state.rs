use std::sync::Arc;

use coursehub_core::{Notifier, ReconciliationPolicy, RefundPolicy};
use coursehub_lifecycle::{CourseLifecycle, CourseReview, ReconciliationJob, RefundWorkflow, Repositories};
use coursehub_store::RedisClient;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub courses: Arc<CourseLifecycle>,
    pub review: Arc<CourseReview>,
    pub refunds: Arc<RefundWorkflow>,
    pub reconciliation: Arc<ReconciliationJob>,
    /// Absent in tests and single-node runs; rate limiting and the
    /// reconciliation lease are skipped without it.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        notifier: Arc<dyn Notifier>,
        refund_policy: RefundPolicy,
        reconciliation_policy: ReconciliationPolicy,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            courses: Arc::new(CourseLifecycle::new(repos.courses.clone(), notifier.clone())),
            review: Arc::new(CourseReview::new(repos.courses.clone(), notifier.clone())),
            refunds: Arc::new(RefundWorkflow::new(repos.clone(), notifier, Arc::new(refund_policy))),
            reconciliation: Arc::new(ReconciliationJob::new(repos, reconciliation_policy)),
            redis: None,
            rate_limit_per_minute: 120,
            auth,
            metrics: Arc::new(Metrics::new()?),
        })
    }

    pub fn with_redis(mut self, redis: Arc<RedisClient>, rate_limit_per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.rate_limit_per_minute = rate_limit_per_minute;
        self
    }
}
