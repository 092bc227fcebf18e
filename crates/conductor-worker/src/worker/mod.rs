//! Worker host for task execution
//!
//! This module provides:
//! - [`WorkerHost`] - Lifecycle: build, init, graceful shutdown
//! - [`WorkerRegistry`] - Explicit handler registration with overrides
//! - [`TaskPoller`] - One poll/execute/report tick per task type
//! - [`plan_thread_allocation`] - Execution slots per task type
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          WorkerHost                           │
//! │  ┌────────────┐  ┌────────────┐        ┌────────────┐         │
//! │  │ poll loop  │  │ poll loop  │  ...   │ poll loop  │         │
//! │  │ (type A)   │  │ (type B)   │        │ (type N)   │         │
//! │  └─────┬──────┘  └─────┬──────┘        └─────┬──────┘         │
//! │        │ fixed delay    │                     │                │
//! │        ▼                ▼                     ▼                │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │                     TaskPoller                          │   │
//! │  │  gates ─► slot (TaskSlots) ─► poll ─► spawn execution   │   │
//! │  └────────────────────────────────────────────────────────┘   │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │        Executions (TaskTracker, slot held throughout)   │   │
//! │  │   execute handler ─► report result (RetryPolicy)        │   │
//! │  └────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod host;
mod metrics;
mod planner;
mod poller;
mod registry;
mod slots;

pub use host::{HostError, HostStatus, ShutdownOutcome, WorkerHost};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use planner::{plan_thread_allocation, AllocationMode, ThreadAllocation, MAX_THREAD_COUNT};
pub use poller::{ReportOutcome, TaskPoller, TickOutcome};
pub use registry::WorkerRegistry;
pub use slots::{SlotGuard, TaskSlots};
