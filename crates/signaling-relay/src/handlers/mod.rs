//! HTTP handlers.

pub mod events;
pub mod websocket;

pub use events::events_handler;
pub use websocket::websocket_handler;
