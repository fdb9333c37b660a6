//! Task board sync server library.
//!
//! Hosts the authority over task records and the WebSocket endpoint that
//! clients synchronize against. Exposed as a library so tests and other
//! binaries can run the server in-process.

pub mod authority;
pub mod config;
pub mod hub;
pub mod server;
pub mod store;
