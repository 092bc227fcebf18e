//! # Conductor Worker
//!
//! Task worker host for a workflow orchestration server: polls the server for
//! tasks of each registered type, runs the matching handler and reports the
//! result back.
//!
//! ## Features
//!
//! - **Per-type execution slots**: explicit counts per task type, or a shared pool split evenly
//! - **Fault-isolated ticks**: handler errors and panics become FAILED results, never crash a poll loop
//! - **Report retries**: fixed-delay retries for transient server errors, then the result is dropped
//! - **Graceful shutdown**: in-flight executions drain within a grace period, then get cancelled
//! - **Domains**: poll a partition of a task type's queue
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerRegistry                          │
//! │  (handlers + per-type overrides, external configuration)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ into_host
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerHost                            │
//! │  (thread allocation, one poll loop per task type)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TaskServerClient                          │
//! │  (poll_task / report_result; HTTP, RPC or in-memory)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use conductor_worker::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_telemetry(TelemetryConfig::from_env());
//!
//!     let mut registry = WorkerRegistry::new();
//!     registry.register(
//!         Arc::new(handler_fn("greet", |task: Task| async move {
//!             let name = task.input_data["name"].as_str().unwrap_or("world").to_string();
//!             Ok(json!({ "greeting": format!("hello {}", name) }))
//!         })),
//!         WorkerOverrides::new()
//!             .with_thread_count(4)
//!             .with_polling_interval(Duration::from_millis(200)),
//!     );
//!
//!     let server = Arc::new(InMemoryTaskServer::new());
//!     let host = registry.into_host(server, WorkerHostConfig::from_env()?)?;
//!     host.init()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod reliability;
pub mod task;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::client::{
        AvailabilityFlag, InMemoryTaskServer, ServerAvailability, ServerError, TaskServerClient,
    };
    pub use crate::config::{
        ConfigError, PropertyWorkerConfiguration, WorkerConfiguration, WorkerHostConfig,
        WorkerOverrides,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::task::{
        blocking_handler_fn, handler_fn, HandlerError, Task, TaskHandler, TaskResult,
        TaskResultStatus,
    };
    pub use crate::telemetry::{init_telemetry, TelemetryConfig};
    pub use crate::worker::{
        HostError, HostStatus, ShutdownOutcome, WorkerHost, WorkerRegistry,
    };
}

// Re-export key types at crate root
pub use client::{InMemoryTaskServer, ServerError, TaskServerClient};
pub use config::{ConfigError, WorkerHostConfig, WorkerOverrides};
pub use reliability::RetryPolicy;
pub use task::{HandlerError, Task, TaskHandler, TaskResult, TaskResultStatus};
pub use worker::{
    plan_thread_allocation, HostError, HostStatus, ShutdownOutcome, ThreadAllocation, WorkerHost,
    WorkerRegistry,
};
