//! Shared protocol definitions for the `Taskboard` wire format.

pub mod codec;
pub mod sync;
pub mod task;
