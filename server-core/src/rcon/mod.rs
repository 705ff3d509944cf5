//! The RCON side of the control plane: transport lifecycle, the engine that
//! multiplexes commands over the single connection, the typed command surface
//! and the parsers that turn response text into data.

pub mod commands;
pub mod connection;
pub mod engine;
pub mod parsers;

pub use commands::PlayerTarget;
pub use connection::ConnectionState;
pub use engine::RconEngine;
pub use parsers::{MapInfo, PlayerInfo, SquadInfo};
