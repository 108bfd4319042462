//! Certificate inspection module
//!
//! Reads PEM encoded X.509 certificates from disk and resolves their
//! expiry, falling back to the known `mkcert` default validity when a
//! certificate cannot be parsed.

pub mod expiry;

// Re-export commonly used types
pub use expiry::{ExpiryOutcome, fallback_expiry, resolve_expiry};
