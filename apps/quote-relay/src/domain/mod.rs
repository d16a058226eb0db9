//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the core domain types for quote fan-out with no
//! I/O. All types here are pure Rust with serialization support.

/// Downstream and upstream wire protocol messages.
pub mod protocol;

/// Tick and client identity types.
pub mod streaming;

/// Subscription tracking and delta computation.
pub mod subscription;
