//! Core types for the Agent Bus.
//!
//! Every message crossing an agent boundary carries a constitutional hash, a
//! tenant partition key and a monotonic lifecycle status. This crate holds
//! the data model shared by the pipeline, the resilience layer and the HTTP
//! surface:
//!
//! - [`Message`] and its enums ([`MessageType`], [`Priority`], [`MessageStatus`])
//! - [`ValidationResult`], the immutable output of a validation strategy
//! - [`AgentRole`] and the implementer/validator role partition
//! - [`BusError`], the full error taxonomy with stable error codes

pub mod error;
pub mod ids;
pub mod message;
pub mod role;
pub mod validation;

pub use error::{sanitize_hash, BusError, BusResult, ErrorKind, RoleLabel};
pub use ids::{AgentId, ConversationId, MessageId, TenantId};
pub use message::{Message, MessageBuilder, MessageStatus, MessageType, Payload, Priority};
pub use role::{AgentRole, RoleAction};
pub use validation::ValidationResult;
