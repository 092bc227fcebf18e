//! Server-facing capabilities consumed by the worker host
//!
//! This module provides:
//! - [`TaskServerClient`] trait for polling tasks and reporting results
//! - [`InMemoryTaskServer`] for testing
//! - [`ServerAvailability`] gate to pause polling while the server is out of service

mod availability;
mod memory;
mod server;

pub use availability::{AvailabilityFlag, ServerAvailability};
pub use memory::{InMemoryTaskServer, PollRecord};
pub use server::{ServerError, TaskServerClient};
