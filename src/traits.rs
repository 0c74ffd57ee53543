//! Ports to the collaborators the orchestration layer drives but does not
//! implement: chat platforms, the agent runtime, and the tmux server.

mod agent;
mod channels;
mod terminal;

pub use agent::*;
pub use channels::*;
pub use terminal::*;
