//! The state services: reconciliation of RCON poll results into in-memory
//! snapshots, emitting semantic deltas on the event bus. Only the scheduler's
//! poll tasks write here; everyone else reads copies.

pub mod layers;
pub mod players;
pub mod squads;

pub use layers::LayerService;
pub use players::PlayerService;
pub use squads::SquadService;
