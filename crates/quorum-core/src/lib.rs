//! Core types and error definitions for the Quorum orchestration engine.
//!
//! This crate provides the foundational types shared across the Quorum
//! crates: the unified error enum and the opaque payload maps that flow
//! between tasks and agents.
//!
//! # Main types
//!
//! - [`QuorumError`]: Unified error enum for all Quorum subsystems.
//! - [`QuorumResult`]: Convenience alias for `Result<T, QuorumError>`.
//! - [`Payload`]: Opaque key/value map used for task input, agent output and context.

/// Error types.
pub mod error;
/// Payload alias and dotted-path helpers.
pub mod payload;

pub use error::{QuorumError, QuorumResult};
pub use payload::Payload;
