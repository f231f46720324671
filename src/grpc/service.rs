//! Rate limiter service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use super::interceptor::RateLimitInterceptor;
use super::proto::{rate_limiter_server::RateLimiter, CheckRequest, CheckResponse};
use crate::ratelimit::RateLimitResult;

/// Implementation of the `tollgate.v1.RateLimiter` gRPC interface.
///
/// Admission is decided by the interceptor; the handler only reports the
/// decision it was given.
pub struct RateLimiterServiceImpl {
    interceptor: Arc<RateLimitInterceptor>,
}

impl RateLimiterServiceImpl {
    pub fn new(interceptor: Arc<RateLimitInterceptor>) -> Self {
        Self { interceptor }
    }
}

#[tonic::async_trait]
impl RateLimiter for RateLimiterServiceImpl {
    #[instrument(skip(self, request), fields(requested = %request.get_ref().identity))]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        self.interceptor
            .intercept(request, |request| async move {
                let decision = request
                    .extensions()
                    .get::<RateLimitResult>()
                    .copied()
                    .unwrap_or_default();

                debug!(remaining = decision.remaining, "Call admitted");

                Ok::<_, Status>(Response::new(CheckResponse {
                    allowed: true,
                    remaining: i64::try_from(decision.remaining).unwrap_or(i64::MAX),
                }))
            })
            .await
    }
}
