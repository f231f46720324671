//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::interceptor::RateLimitInterceptor;
use super::proto::rate_limiter_server::RateLimiterServer;
use super::service::RateLimiterServiceImpl;
use crate::error::{Result, TollgateError};

/// gRPC server for the rate limiter service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Admission control wrapped around every call
    interceptor: Arc<RateLimitInterceptor>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, interceptor: Arc<RateLimitInterceptor>) -> Self {
        Self { addr, interceptor }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = RateLimiterServiceImpl::new(self.interceptor);

        info!(addr = %self.addr, "Starting gRPC server for RateLimiter");

        Server::builder()
            .add_service(RateLimiterServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TollgateError::Grpc(e)
            })
    }
}
