//! Realtime WebSocket connections
//!
//! [`ConnectionHandler`] runs a single connection; [`HandlerPool`] reuses
//! handlers across connections.

pub mod handler;
pub mod pool;

pub use handler::{ConnectionHandler, ConnectionState, LivenessConfig, Session, SessionFn};
pub use pool::HandlerPool;
