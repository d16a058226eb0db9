//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the relay services and the port interfaces that
//! define how they interact with client channels and the upstream provider.

/// Port interfaces for external systems (client channels, upstream link).
pub mod ports;

/// Relay services: registry ownership, link management, fan-out.
pub mod services;
