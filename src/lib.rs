//! certdash - local dashboard to manage mkcert development certificates
//!
//! Wraps the `mkcert` command line tool behind a small HTTP API: generate,
//! list, renew and delete locally-trusted TLS certificates, keep their
//! metadata in a `SQLite` store, and report whether the local root CA is
//! currently trusted by the operating system.

pub mod cert;
pub mod cli;
pub mod metrics;
pub mod mkcert;
pub mod server;
pub mod store;
pub mod trust;
