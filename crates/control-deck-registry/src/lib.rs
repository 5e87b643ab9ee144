//! Authoritative in-memory session registry and audit sinks.
//!
//! The [`Registry`] owns the canonical record for every live connection and
//! is the only component allowed to mutate it; everything else works with
//! snapshots. The `audit` module provides the fire-and-forget
//! [`audit::AuditWriter`] plus in-memory and sqlite sink implementations.

pub mod audit;
pub mod error;
pub mod registry;

pub use error::RegistryError;
pub use registry::Registry;
