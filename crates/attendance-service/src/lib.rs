//! Attendance Service Library
//!
//! Core of the lecture monitoring backend. During a live lecture a camera
//! pipeline publishes presence snapshots to a per-lecture broker queue; this
//! service:
//!
//! - Starts and stops one broker consumer per lecture on demand
//! - Records every snapshot as an attendance row and enriches it with the
//!   student's identity and group
//! - Fans the enriched event out to every WebSocket viewer subscribed to
//!   that lecture
//!
//! # Architecture
//!
//! ```text
//! LectureSessionManager (one per process)
//! └── LectureConsumer (one task per active lecture)
//!     ├── BrokerConnector -> BrokerSubscription (dial, prefetch, manual ack)
//!     └── SubscriberHub::broadcast
//!         ├── AttendanceRecorder (Postgres, bounded by a timeout)
//!         └── ClientHandle outbound queues
//!             └── ClientConnection (inbound + outbound pump per socket)
//! ```
//!
//! The session map and the hub's subscription map are the only shared
//! mutable state. Each is guarded by its own lock, held only for map
//! mutation or snapshotting, and no code path holds both.
//!
//! # Modules
//!
//! - [`broker`] - Broker seam, AMQP implementation, consumer loop and backoff
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP status code mapping
//! - [`handlers`] - HTTP request handlers
//! - [`hub`] - Lecture subscriber registry and fanout
//! - [`models`] - Wire and domain types
//! - [`observability`] - Health state and Prometheus metrics
//! - [`recorder`] - Attendance recorder seam and Postgres implementation
//! - [`repositories`] - Database access
//! - [`routes`] - Axum router setup
//! - [`sessions`] - Lecture session lifecycle
//! - [`ws`] - WebSocket client connection pumps

pub mod broker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod observability;
pub mod recorder;
pub mod repositories;
pub mod routes;
pub mod sessions;
pub mod ws;
