//! The per-server control plane for a dedicated Squad game server.
//!
//! The overall architecture is like this:
//!
//! ```text
//! log source (tail / ftp / sftp) -> bounded queue -> rule engine -> event bus
//! rcon connection -> rcon engine -> parsers -> state services -> event bus
//! update scheduler -> rcon queries -> state services
//! plugins / push bridge -> subscribe on the event bus, command via the engine
//! ```
//!
//! The [`server::ServerController`] owns all of the above and walks the
//! lifecycle `Created -> Starting -> Running -> Stopping -> Stopped`. Everything
//! below it follows a single-writer discipline: the rule loop owns the
//! correlation store, the engine task owns the pending command map, and the
//! state services are only written from the scheduler's poll results.

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod logs;
pub mod model;
pub mod plugin;
pub mod rcon;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;
