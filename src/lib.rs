//! Tollgate - Per-identity admission control for gRPC services
//!
//! This crate enforces token bucket limits in front of a gRPC service. Bucket
//! state lives either in process memory or in Redis, where one atomic script
//! per check keeps every serving instance on the same budget. A failing
//! backend never rejects traffic: checks fail open.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
