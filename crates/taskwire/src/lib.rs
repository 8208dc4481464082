#![doc = include_str!("../README.md")]

pub mod config;
pub mod drain;
pub mod execution;
pub mod registry;
pub mod service;
pub mod telemetry;
pub mod transport;

pub use config::ServiceConfig;
pub use execution::{Execution, Output, TaskFailure};
pub use registry::{HandlerRegistry, TaskHandler, task_fn};
pub use service::{Service, ServiceState};
pub use transport::{GrpcTransport, TaskStream, Transport};

// Public re-export so downstream crates can access the protocol types via
// `taskwire::core`
pub use taskwire_core as core;
pub use taskwire_core::{Error, Result};
