//! REST API: routes, shared state and handlers

pub mod handlers;
pub mod router;
pub mod state;
