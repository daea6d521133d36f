//! This module contains utilities that are useful for testing code built on packet channels.
//!  They are used for testing this crate itself, but they are also exported for application
//!  testing, which is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod echo_check;
pub mod memory_transport;
pub mod packets;
