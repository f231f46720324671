//! gRPC surface: the rate-limit interceptor and the `RateLimiter` service.

mod interceptor;
mod server;
mod service;

pub use interceptor::{
    attach_rate_limit_metadata, RateLimitInterceptor, DEFAULT_IDENTITY_HEADER, REMAINING_HEADER,
    RESET_HEADER,
};
pub use server::GrpcServer;
pub use service::RateLimiterServiceImpl;

// Include the generated protobuf code
pub mod proto {
    tonic::include_proto!("tollgate.v1");
}

// Re-export commonly used types
pub use proto::{rate_limiter_server::RateLimiterServer, CheckRequest, CheckResponse};
