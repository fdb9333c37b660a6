//! Taskboard client library: a live, optimistically updated view of a shared
//! task board.

pub mod config;
pub mod net;
pub mod session;
pub mod transport;
