//! Agent Bus daemon library
//!
//! This module provides the components behind `agent-busd`:
//! - REST API handlers over a [`MessageBus`](agent_bus_core::MessageBus)
//! - Layered configuration loading
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
