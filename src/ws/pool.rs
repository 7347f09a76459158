//! Connection handler pool
//!
//! Handlers are checked out with a session function installed and returned
//! scrubbed, so nothing from one connection is visible to the next.

use hyper_tungstenite::HyperWebsocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;

use super::handler::{ConnectionHandler, LivenessConfig, SessionFn};
use crate::types::Result;

/// Default number of idle handlers kept for reuse
pub const DEFAULT_MAX_IDLE: usize = 64;

pub struct HandlerPool {
    idle: Mutex<Vec<ConnectionHandler>>,
    max_idle: usize,
    config: LivenessConfig,
    created: AtomicUsize,
}

impl HandlerPool {
    pub fn new(config: LivenessConfig, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            config,
            created: AtomicUsize::new(0),
        }
    }

    fn idle(&self) -> MutexGuard<'_, Vec<ConnectionHandler>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a handler, reset for a new connection running `session`
    pub fn acquire(&self, session: SessionFn) -> ConnectionHandler {
        let mut handler = self.idle().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            ConnectionHandler::new(self.config.clone())
        });
        handler.reset(Some(session));
        handler
    }

    /// Scrub a handler and keep it for reuse if there is room
    pub fn release(&self, mut handler: ConnectionHandler) {
        handler.reset(None);
        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push(handler);
        }
    }

    /// Serve a pending upgrade with a pooled handler
    pub async fn handle(&self, websocket: HyperWebsocket, session: SessionFn) -> Result<()> {
        let handler = self.acquire(session);
        let result = handler.serve_upgrade(websocket).await;
        self.release(handler);
        result
    }

    /// Serve an established WebSocket with a pooled handler
    pub async fn handle_stream<S>(&self, ws: WebSocketStream<S>, session: SessionFn) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = self.acquire(session);
        let result = handler.serve(ws).await;
        self.release(handler);
        result
    }

    /// Liveness and size limits of pooled handlers
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Handlers currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Handlers allocated over the pool's lifetime
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl Default for HandlerPool {
    fn default() -> Self {
        Self::new(LivenessConfig::default(), DEFAULT_MAX_IDLE)
    }
}
