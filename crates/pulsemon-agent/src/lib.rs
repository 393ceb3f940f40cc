//! The pulsemon agent: samples the host on one tick, reports on another,
//! and ships each report through a pool of retrying workers over HTTP or
//! gRPC.

pub mod config;
pub mod envelope;
pub mod error;
pub mod netaddr;
pub mod pipeline;
pub mod transport;

pub use config::{AgentArgs, AgentConfig};
pub use error::SendError;
pub use pipeline::{Pipeline, PipelineSettings, PipelineStats};
