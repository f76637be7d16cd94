//! Gateway: HTTP/WebSocket server with readiness gating.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Build origin policy, readiness channel, shared state
//! 3. Bind the listener and start serving health + realtime routes
//! 4. Connect the store in the background, open the gate, seed the admin account
//!
//! Data route groups (auth, deals, flash orders) are mounted behind the
//! request gate in `server.rs`; their business logic lives elsewhere.

pub mod bootstrap;
pub mod error;
pub mod gate;
pub mod origin;
pub mod readiness;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod sqlite;
pub mod state;
pub mod store;
pub mod ws;
