//! Actor model for room state.
//!
//! ```text
//! RoomRegistry (singleton, one mailbox)
//! └── owns N Rooms (plain data, one per meeting)
//!     ├── awaiting:  user → Client
//!     ├── admitted:  user → Client
//!     ├── requests:  user → JoinRequestInfo
//!     └── screen share owner
//! ```
//!
//! Connection handlers talk to the registry only through
//! [`RoomRegistryHandle`]. Each `Client` inside a room holds the producer
//! end of that connection's outbound queue.
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistry` actor and its handle
//! - [`room`] - per-room membership state machine
//! - [`messages`] - mailbox message and outcome types
//! - [`metrics`] - mailbox monitoring and registry counters

pub mod messages;
pub mod metrics;
pub mod registry;
mod room;

pub use messages::{
    AdmitOutcome, Departure, RegistryMessage, RegistryStatus, RequestOutcome, Resolution,
    RoomSnapshot,
};
pub use metrics::{
    AdmissionOutcome, MailboxMonitor, MailboxThresholds, RegistryMetrics, RegistryMetricsSnapshot,
};
pub use registry::{RegistrySettings, RoomRegistry, RoomRegistryHandle};
