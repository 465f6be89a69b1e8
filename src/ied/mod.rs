//! Per-IED connection supervision.

pub mod client;
pub mod supervisor;

pub use client::{ClientFactory, ConnectionState, IedClient, SupervisorError};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHandle, SupervisorState};
