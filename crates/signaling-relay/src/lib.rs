//! Signaling Relay Library
//!
//! A WebRTC signaling relay. Browsers connect over WebSocket, join a room
//! (a meeting), and exchange session descriptions and ICE candidates with
//! the other participants. The relay never touches media.
//!
//! Participants enter a room in two steps. A new connection is *awaiting*
//! until it is admitted, either by announcing itself as host, by host
//! approval of a join request, or automatically when membership history
//! shows the user has joined the room before. Only admitted participants
//! see the room's broadcasts.
//!
//! # Architecture
//!
//! ```text
//! axum router
//! ├── /ws            → connection handler (read loop + write pump per client)
//! │                     └── RoomRegistryHandle ──► RoomRegistry actor
//! │                                                 └── Room (per meeting)
//! ├── /api/v1/meetings/:id/events → SSE stream ◄── EventHub ◄── RoomRegistry
//! └── /health, /ready, /metrics
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room registry actor and per-room state
//! - [`auth`] - Access token extractor
//! - [`client`] - Connection identity and outbound queue
//! - [`config`] - Service configuration from environment
//! - [`delivery`] - Bounded drop-on-full delivery queues
//! - [`errors`] - Error types with client-safe messages
//! - [`events`] - Per-room event fan-out for SSE subscribers
//! - [`handlers`] - WebSocket and SSE endpoints
//! - [`history`] - Membership history for returning users
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`protocol`] - Wire envelope and typed message payloads
//! - [`routes`] - Router and application state

pub mod actors;
pub mod auth;
pub mod client;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod history;
pub mod observability;
pub mod protocol;
pub mod routes;
