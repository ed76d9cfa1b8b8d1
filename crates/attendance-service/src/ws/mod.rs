//! WebSocket viewers.
//!
//! Each upgraded socket becomes one [`connection`]: an inbound pump reading
//! subscribe/unsubscribe frames and an outbound pump writing attendance
//! events from the client's queue.

pub mod connection;

pub use connection::{drain_connections, run_connection, serve_socket};
