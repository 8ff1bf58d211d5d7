//! Hard-coded resource limits
//!
//! The buffer growth/shrink constants and the body cap are fixed; only the
//! per-connection buffer ceilings can be changed at runtime, via
//! [`HttpServer::set_receive_buffer_size`](crate::HttpServer::set_receive_buffer_size)
//! and [`HttpServer::set_send_buffer_size`](crate::HttpServer::set_send_buffer_size).
//!
//! # Memory Consumption
//!
//! Each connection starts with a [`READ_BUF_INITIAL_SIZE`] read buffer and an
//! empty write queue. The read buffer doubles while a request prelude is
//! still incomplete and shrinks back after consumption, so steady-state
//! memory per idle connection is `READ_BUF_INITIAL_SIZE` plus queue
//! bookkeeping.

/// Initial capacity of a connection's read buffer (4 KiB).
pub const READ_BUF_INITIAL_SIZE: usize = 4 * 1024;

/// Floor the read buffer shrinks to after a large request is consumed (256 B).
pub const READ_BUF_MINIMUM_SIZE: usize = 256;

/// Growth factor applied when the read buffer fills up, and the threshold
/// divisor used when shrinking it back.
pub const CAPACITY_GROWTH_FACTOR: usize = 2;

/// Default ceiling for both the read buffer and the write queue (1 MiB).
///
/// Reaching it with a still-unparsed prelude (or a still-unflushed response
/// backlog) closes the connection.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Largest request body accepted before the server answers 500 and closes
/// (100 MiB).
pub const MAX_BODY_SIZE: usize = 100 << 20;
