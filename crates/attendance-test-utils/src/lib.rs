//! # Attendance Test Utilities
//!
//! Mocks and fixtures for testing the Attendance Service without a broker or
//! a database.
//!
//! ## Modules
//!
//! - `mock_broker` - In-memory broker implementing `BrokerConnector`
//! - `mock_recorder` - Scripted `AttendanceRecorder`
//! - `fixtures` - Broker payloads and WebSocket control frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use attendance_test_utils::*;
//!
//! let broker = MockBroker::new();
//! broker.publish("q42", presence_payload("12345"));
//! broker.publish("q42", end_of_lecture_payload());
//!
//! let recorder = Arc::new(MockRecorder::new().with_person("12345", "A", "B", None));
//! ```

pub mod fixtures;
pub mod mock_broker;
pub mod mock_recorder;

pub use fixtures::*;
pub use mock_broker::*;
pub use mock_recorder::*;
