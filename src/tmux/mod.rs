mod bridge;
mod client;
mod tools;

pub use bridge::{TmuxBridge, TmuxBridgeState};
pub use client::{normalize_terminal_text, TmuxClient};
pub use tools::tmux_tools;
