//! Client side packet I/O for RADIUS style request / response protocols.
//!
//! This crate turns a non-blocking byte transport (a connected UDP socket or a TCP stream) into a
//!  packet oriented request / response channel. Callers hand a [ClientBio](client::ClientBio) an
//!  outgoing packet and later receive either the matching response or a terminal failure for it,
//!  while identifier allocation, retransmission and response correlation happen inside.
//!
//! ## Wire header
//!
//! All numbers in network byte order (BE):
//! ```ascii
//!  0: code (u8)
//!  1: identifier (u8) - correlates a response with its request, one 256 slot space per code
//!  2: length (u16) - total length of the packet including this header
//!  4: authenticator (16 bytes) - integrity field, opaque to this layer
//! 20: attributes
//! ```
//!
//! ## Driving a channel
//!
//! Nothing in here blocks or spawns: the channel is a plain state machine. The embedding event
//!  loop calls `read()` when the socket is readable, `flush()` when it is writable, and schedules
//!  a single timer for `next_deadline()`, calling `fire_expired()` when it goes off. The
//!  [driver](driver::ClientDriver) module does exactly that on top of tokio.
//!
//! ## Related:
//! * RFC 2865 (RADIUS), RFC 2866 (accounting), RFC 5176 (dynamic authorization)
//! * RFC 5080 section 2.2 for retransmission behaviour
//! * RFC 6613 (RADIUS over TCP): clients do not retransmit on the same connection

pub mod config;
pub mod error;
pub mod packet;
pub mod packet_bio;
pub mod id_table;
pub mod retry;
pub mod frame;
pub mod transport;
pub mod codec;
pub mod integrity;
pub mod client;
pub mod driver;
pub mod test_util;
