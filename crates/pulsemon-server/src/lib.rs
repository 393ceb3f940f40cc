//! Collector server: HTTP and gRPC ingest in front of a pluggable metric
//! store.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod flusher;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod state;
pub mod subnet;
