//! The coordination hub: presence, reliable delivery, rooms and calls,
//! signaling relay, rate limiting, liveness, chat, push, and the HTTP +
//! WebSocket server in front of it.
//!
//! Lifecycle:
//! 1. Load config (done by the binary)
//! 2. Wire push delivery if VAPID keys are present
//! 3. Start HTTP server (health, TURN, config, push key)
//! 4. Attach WebSocket upgrade handler
//! 5. Start presence, liveness and retry timers
//!
//! All protocol state lives in [`hub::Hub`]; transport tasks and timers only
//! feed it text and instants under the state lock.

pub mod capacity;
pub mod chat;
pub mod error;
pub mod hub;
pub mod presence;
pub mod push;
pub mod rate_limit;
pub mod reliable;
pub mod rooms;
pub mod server;
pub mod signaling;
pub mod state;
pub mod timers;
pub mod turn;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use {
    error::{OpError, OpResult},
    hub::Hub,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
