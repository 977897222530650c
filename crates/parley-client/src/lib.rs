//! Parley client library logic.
//!
//! Holds one duplex WebSocket connection to the agent backend, reconnecting
//! with exponential backoff, and routes the frames it receives into session
//! events and voice playback.

pub mod config;
pub mod connection;
pub mod context;
pub mod router;
pub mod transport;

pub use connection::{Action, ConnectionEvent, ConnectionMachine, ReconnectPolicy};
pub use context::SessionContext;
pub use router::MessageRouter;
pub use transport::{
    websocket_url, ConnectionManager, Connector, Link, TransportError, WebSocketConnector,
};
