//! Chat front-end orchestration for a coding agent and a remote tmux server.
//!
//! Platform adapters turn chat traffic into [`types::InboundEvent`]s and hand
//! them to [`core::run`]. From there the [`router::Router`] keeps one
//! [`controller::ChatController`] per conversation, which drives an agent
//! session, gates its tools through [`permissions`] and [`authorizer`],
//! streams replies through [`channels::StreamSink`] and bridges the chat to
//! tmux via [`tmux::TmuxBridge`].

pub mod authorizer;
pub mod channels;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod permissions;
pub mod router;
pub mod session;
pub mod tmux;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;
