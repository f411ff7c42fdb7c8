//! Session orchestration for the mimic-dx diagnostic client.
//!
//! This crate sits between a presentation layer (the `mimic-dx` CLI) and the client
//! SDK. It owns the conversation state of a diagnostic session and turns every failure
//! into a normalized `{ error, details }` result.
//!
//! # Architecture Overview
//!
//! - **Orchestration**: [`orchestrator::SessionOrchestrator`] runs streamed start turns
//!   and request/response resume turns
//! - **Conversation state**: validation and durable persistence of the message history
//!   behind a pluggable key/value store
//! - **Results**: normalized turn results and user-facing failure guidance
//! - **Configuration**: YAML file plus environment overrides

pub mod config;
pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod result;

#[cfg(test)]
pub mod test_utils;

pub use errors::{SessionError, StoreError};
pub use orchestrator::SessionOrchestrator;
pub use result::{SessionFailure, SessionResult};
