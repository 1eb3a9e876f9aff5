//! Core types and error definitions for the Recall retrieval memory.
//!
//! This crate provides the foundational types shared across the Recall crates:
//! error handling and the conversation message representation.
//!
//! # Main types
//!
//! - [`RecallError`] — Unified error enum for all Recall subsystems.
//! - [`RecallResult`] — Convenience alias for `Result<T, RecallError>`.
//! - [`Role`] — Message role (system, user, assistant, tool).
//! - [`Message`] — A single message within a conversation session.
//! - [`ToolCall`] — An LLM-initiated tool invocation recorded on a message.

/// Error type and result alias.
pub mod error;
/// Conversation messages and roles.
pub mod message;
/// Tool call records.
pub mod tool;

pub use error::{RecallError, RecallResult};
pub use message::{Message, Role};
pub use tool::ToolCall;
