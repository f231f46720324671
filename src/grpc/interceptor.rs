//! Rate-limit interceptor for unary gRPC calls.
//!
//! Every call is identified, checked against its identity's bucket, and
//! answered with `x-ratelimit-remaining` / `x-ratelimit-reset` metadata. Denied
//! calls end with `RESOURCE_EXHAUSTED` before the handler runs.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tonic::metadata::MetadataMap;
use tonic::{Code, Request, Response, Status};
use tracing::{debug, trace, warn};

use crate::ratelimit::{ConfigSource, Guard, Identity, RateLimitResult};

/// Response metadata key for the whole tokens left.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Response metadata key for the epoch second the bucket is full again.
pub const RESET_HEADER: &str = "x-ratelimit-reset";
/// Request metadata key carrying the identity unless configured otherwise.
pub const DEFAULT_IDENTITY_HEADER: &str = "user-id";

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Wraps unary handlers with per-identity admission control.
pub struct RateLimitInterceptor {
    guard: Guard,
    configs: Arc<dyn ConfigSource>,
    identity_header: String,
}

impl RateLimitInterceptor {
    pub fn new(guard: Guard, configs: Arc<dyn ConfigSource>) -> Self {
        Self {
            guard,
            configs,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
        }
    }

    /// Read the identity from `header` instead of `user-id`.
    pub fn with_identity_header(mut self, header: impl Into<String>) -> Self {
        self.identity_header = header.into().to_ascii_lowercase();
        self
    }

    /// Identify the caller, look up its limits and take one token.
    ///
    /// The limit lookup and the take share the caller's deadline. A lookup that
    /// runs out of time falls back to the default limits.
    pub async fn admit(&self, metadata: &MetadataMap) -> (Identity, RateLimitResult) {
        let started = Instant::now();
        let identity = Identity::from_metadata(metadata, &self.identity_header);
        let deadline = grpc_timeout(metadata);

        let lookup = self.configs.get_user_config(identity.as_str());
        let config = match self.guard.budget(deadline) {
            Some(limit) => match tokio::time::timeout(limit, lookup).await {
                Ok(config) => config,
                Err(_) => {
                    warn!(
                        identity = %identity,
                        timeout = ?limit,
                        "Config lookup timed out, using default limits"
                    );
                    self.configs.default_config()
                }
            },
            None => lookup.await,
        };
        let deadline = deadline.map(|deadline| deadline.saturating_sub(started.elapsed()));

        trace!(
            identity = %identity,
            rate = config.rate,
            capacity = config.capacity,
            deadline = ?deadline,
            "Checking admission"
        );

        let result = self
            .guard
            .check_within(identity.as_str(), config.rate, config.capacity, deadline)
            .await;
        (identity, result)
    }

    /// Run `handler` if the caller has a token left.
    ///
    /// On success the decision is available to the handler through the request
    /// extensions. The rate-limit metadata is attached to whatever comes back,
    /// including the handler's own error status.
    pub async fn intercept<T, U, F, Fut>(
        &self,
        mut request: Request<T>,
        handler: F,
    ) -> Result<Response<U>, Status>
    where
        F: FnOnce(Request<T>) -> Fut,
        Fut: Future<Output = Result<Response<U>, Status>>,
    {
        let (identity, result) = self.admit(request.metadata()).await;

        if !result.allowed {
            debug!(identity = %identity, reset_at = result.reset_at, "Rejecting call");
            let mut metadata = MetadataMap::new();
            attach_rate_limit_metadata(&mut metadata, &result);
            return Err(Status::with_metadata(
                Code::ResourceExhausted,
                format!("rate limit exceeded, retry after {}", result.reset_at),
                metadata,
            ));
        }

        request.extensions_mut().insert(result);

        match handler(request).await {
            Ok(mut response) => {
                attach_rate_limit_metadata(response.metadata_mut(), &result);
                Ok(response)
            }
            Err(mut status) => {
                attach_rate_limit_metadata(status.metadata_mut(), &result);
                Err(status)
            }
        }
    }
}

/// Write the remaining-tokens and reset metadata for `result`.
pub fn attach_rate_limit_metadata(metadata: &mut MetadataMap, result: &RateLimitResult) {
    metadata.insert(REMAINING_HEADER, result.remaining.into());
    metadata.insert(RESET_HEADER, result.reset_at.into());
}

/// Parse the caller's `grpc-timeout` header (e.g. `100m`, `2S`).
fn grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    // At most eight digits followed by a unit.
    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
