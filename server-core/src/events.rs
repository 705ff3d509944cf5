//! The closed set of events the core publishes. Rather than a polymorphic
//! event hierarchy there is one tagged union; subscribers dispatch on
//! [`EventKind`] and the bus keys its subscriber lists by it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{ChainId, ControllerId, EosId, PlatformId, SessionId, SquadId, TeamId};
use crate::model::{Layer, Player, Squad};

/// The discriminator of [`Event`]. The string form is what the push bridge
/// and the bus diagnostics show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    // Log-derived player lifecycle.
    PlayerConnected,
    PlayerDisconnected,
    JoinSucceeded,
    PlayerPossess,
    PlayerUnpossess,
    // Log-derived combat.
    PlayerDamaged,
    PlayerWounded,
    PlayerDied,
    PlayerRevived,
    DeployableDamaged,
    // Log-derived game flow.
    NewGame,
    RoundWinner,
    RoundTickets,
    RoundEnded,
    TickRate,
    AdminBroadcast,
    // Chat-frame derived.
    ChatMessage,
    PossessedAdminCamera,
    UnpossessedAdminCamera,
    PlayerWarned,
    PlayerKicked,
    PlayerBanned,
    SquadCreated,
    // State service deltas.
    PlayerAdded,
    PlayerRemoved,
    PlayerTeamChange,
    PlayerSquadChange,
    PlayerRoleChange,
    PlayerLeaderChange,
    SquadAdded,
    SquadUpdated,
    SquadDisbanded,
    LayerChanged,
    // Lifecycle.
    ServerStarting,
    ServerReady,
    ServerStopping,
    ServerStopped,
    ServerError,
    RconConnected,
    RconDisconnected,
    RconError,
}

impl EventKind {
    /// Every kind there is, in declaration order. Used by consumers that
    /// subscribe across the board, like the push bridge.
    pub const ALL: [EventKind; 41] = [
        EventKind::PlayerConnected,
        EventKind::PlayerDisconnected,
        EventKind::JoinSucceeded,
        EventKind::PlayerPossess,
        EventKind::PlayerUnpossess,
        EventKind::PlayerDamaged,
        EventKind::PlayerWounded,
        EventKind::PlayerDied,
        EventKind::PlayerRevived,
        EventKind::DeployableDamaged,
        EventKind::NewGame,
        EventKind::RoundWinner,
        EventKind::RoundTickets,
        EventKind::RoundEnded,
        EventKind::TickRate,
        EventKind::AdminBroadcast,
        EventKind::ChatMessage,
        EventKind::PossessedAdminCamera,
        EventKind::UnpossessedAdminCamera,
        EventKind::PlayerWarned,
        EventKind::PlayerKicked,
        EventKind::PlayerBanned,
        EventKind::SquadCreated,
        EventKind::PlayerAdded,
        EventKind::PlayerRemoved,
        EventKind::PlayerTeamChange,
        EventKind::PlayerSquadChange,
        EventKind::PlayerRoleChange,
        EventKind::PlayerLeaderChange,
        EventKind::SquadAdded,
        EventKind::SquadUpdated,
        EventKind::SquadDisbanded,
        EventKind::LayerChanged,
        EventKind::ServerStarting,
        EventKind::ServerReady,
        EventKind::ServerStopping,
        EventKind::ServerStopped,
        EventKind::ServerError,
        EventKind::RconConnected,
        EventKind::RconDisconnected,
        EventKind::RconError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PlayerConnected => "PLAYER_CONNECTED",
            EventKind::PlayerDisconnected => "PLAYER_DISCONNECTED",
            EventKind::JoinSucceeded => "JOIN_SUCCEEDED",
            EventKind::PlayerPossess => "PLAYER_POSSESS",
            EventKind::PlayerUnpossess => "PLAYER_UNPOSSESS",
            EventKind::PlayerDamaged => "PLAYER_DAMAGED",
            EventKind::PlayerWounded => "PLAYER_WOUNDED",
            EventKind::PlayerDied => "PLAYER_DIED",
            EventKind::PlayerRevived => "PLAYER_REVIVED",
            EventKind::DeployableDamaged => "DEPLOYABLE_DAMAGED",
            EventKind::NewGame => "NEW_GAME",
            EventKind::RoundWinner => "ROUND_WINNER",
            EventKind::RoundTickets => "ROUND_TICKETS",
            EventKind::RoundEnded => "ROUND_ENDED",
            EventKind::TickRate => "TICK_RATE",
            EventKind::AdminBroadcast => "ADMIN_BROADCAST",
            EventKind::ChatMessage => "CHAT_MESSAGE",
            EventKind::PossessedAdminCamera => "POSSESSED_ADMIN_CAMERA",
            EventKind::UnpossessedAdminCamera => "UNPOSSESSED_ADMIN_CAMERA",
            EventKind::PlayerWarned => "PLAYER_WARNED",
            EventKind::PlayerKicked => "PLAYER_KICKED",
            EventKind::PlayerBanned => "PLAYER_BANNED",
            EventKind::SquadCreated => "SQUAD_CREATED",
            EventKind::PlayerAdded => "PLAYER_ADDED",
            EventKind::PlayerRemoved => "PLAYER_REMOVED",
            EventKind::PlayerTeamChange => "PLAYER_TEAM_CHANGE",
            EventKind::PlayerSquadChange => "PLAYER_SQUAD_CHANGE",
            EventKind::PlayerRoleChange => "PLAYER_ROLE_CHANGE",
            EventKind::PlayerLeaderChange => "PLAYER_LEADER_CHANGE",
            EventKind::SquadAdded => "SQUAD_ADDED",
            EventKind::SquadUpdated => "SQUAD_UPDATED",
            EventKind::SquadDisbanded => "SQUAD_DISBANDED",
            EventKind::LayerChanged => "LAYER_CHANGED",
            EventKind::ServerStarting => "SERVER_STARTING",
            EventKind::ServerReady => "SERVER_READY",
            EventKind::ServerStopping => "SERVER_STOPPING",
            EventKind::ServerStopped => "SERVER_STOPPED",
            EventKind::ServerError => "SERVER_ERROR",
            EventKind::RconConnected => "RCON_CONNECTED",
            EventKind::RconDisconnected => "RCON_DISCONNECTED",
            EventKind::RconError => "RCON_ERROR",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity block many log and chat records carry. Either side may be
/// missing on console players or truncated lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnlineIds {
    pub eos: Option<EosId>,
    pub platform: Option<PlatformId>,
}

/// The attacker half of a combat record, enriched from the correlation store
/// when the line itself only names a controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attacker {
    pub name: Option<String>,
    pub eos: Option<EosId>,
    pub platform: Option<PlatformId>,
    pub controller: Option<ControllerId>,
}

/// One chat channel as reported inside a chat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChatChannel {
    All,
    Team,
    Squad,
    Admin,
}

/// A winning or losing side of a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSide {
    pub team: TeamId,
    pub faction: String,
    pub subfaction: Option<String>,
    pub tickets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerConnectedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub controller: ControllerId,
    pub ip: Option<String>,
    pub ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerDisconnectedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub ip: Option<String>,
    pub eos: Option<EosId>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinSucceededEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    /// The log-side player name.
    pub player_suffix: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerPossessEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub player_suffix: String,
    pub ids: OnlineIds,
    /// The pawn class taken over, e.g. a soldier or a vehicle seat.
    pub pawn: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerUnpossessEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub player_suffix: String,
    pub ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerDamagedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub victim_name: String,
    pub damage: f32,
    pub weapon: String,
    pub attacker: Attacker,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerWoundedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub victim_name: String,
    pub damage: f32,
    pub weapon: Option<String>,
    pub attacker: Attacker,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerDiedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub victim_name: String,
    pub damage: f32,
    pub weapon: Option<String>,
    pub attacker: Attacker,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRevivedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub reviver_name: String,
    pub reviver_ids: OnlineIds,
    pub victim_name: String,
    pub victim_ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployableDamagedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub deployable: String,
    pub damage: f32,
    pub weapon: String,
    pub attacker_name: String,
    pub health_remaining: Option<f32>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGameEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    /// The map asset path brought up for play.
    pub map_classname: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundWinnerEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub faction: String,
    pub layer: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTicketsEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub side: RoundSide,
    /// `true` for the winning side's ticket record.
    pub won: bool,
    pub layer: String,
    pub level: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundEndedEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    /// Absent on a draw.
    pub winner: Option<RoundSide>,
    pub loser: Option<RoundSide>,
    pub layer: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRateEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub tick_rate: f32,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminBroadcastEvent {
    pub time: DateTime<Utc>,
    pub chain_id: ChainId,
    pub message: String,
    pub from: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessageEvent {
    pub time: DateTime<Utc>,
    pub channel: ChatChannel,
    pub name: String,
    pub message: String,
    pub ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminCameraEvent {
    pub time: DateTime<Utc>,
    pub name: String,
    pub ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerWarnedEvent {
    pub time: DateTime<Utc>,
    pub name: String,
    pub reason: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerKickedEvent {
    pub time: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub name: String,
    pub ids: OnlineIds,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerBannedEvent {
    pub time: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub name: String,
    pub platform: Option<PlatformId>,
    pub interval: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquadCreatedEvent {
    pub time: DateTime<Utc>,
    pub creator_name: String,
    pub creator_ids: OnlineIds,
    pub squad_id: SquadId,
    pub squad_name: String,
    pub team_name: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerDeltaEvent {
    pub time: DateTime<Utc>,
    pub player: Player,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerFieldChange<T> {
    pub time: DateTime<Utc>,
    pub player: Player,
    pub old: T,
    pub new: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquadDeltaEvent {
    pub time: DateTime<Utc>,
    pub squad: Squad,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquadUpdatedEvent {
    pub time: DateTime<Utc>,
    pub old: Squad,
    pub new: Squad,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerChangedEvent {
    pub time: DateTime<Utc>,
    pub previous: Option<Layer>,
    pub current: Layer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub time: DateTime<Utc>,
    pub message: Option<String>,
}

/// Every event the core can publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Event {
    PlayerConnected(PlayerConnectedEvent),
    PlayerDisconnected(PlayerDisconnectedEvent),
    JoinSucceeded(JoinSucceededEvent),
    PlayerPossess(PlayerPossessEvent),
    PlayerUnpossess(PlayerUnpossessEvent),
    PlayerDamaged(PlayerDamagedEvent),
    PlayerWounded(PlayerWoundedEvent),
    PlayerDied(PlayerDiedEvent),
    PlayerRevived(PlayerRevivedEvent),
    DeployableDamaged(DeployableDamagedEvent),
    NewGame(NewGameEvent),
    RoundWinner(RoundWinnerEvent),
    RoundTickets(RoundTicketsEvent),
    RoundEnded(RoundEndedEvent),
    TickRate(TickRateEvent),
    AdminBroadcast(AdminBroadcastEvent),
    ChatMessage(ChatMessageEvent),
    PossessedAdminCamera(AdminCameraEvent),
    UnpossessedAdminCamera(AdminCameraEvent),
    PlayerWarned(PlayerWarnedEvent),
    PlayerKicked(PlayerKickedEvent),
    PlayerBanned(PlayerBannedEvent),
    SquadCreated(SquadCreatedEvent),
    PlayerAdded(PlayerDeltaEvent),
    PlayerRemoved(PlayerDeltaEvent),
    PlayerTeamChange(PlayerFieldChange<Option<TeamId>>),
    PlayerSquadChange(PlayerFieldChange<Option<SquadId>>),
    PlayerRoleChange(PlayerFieldChange<Option<String>>),
    PlayerLeaderChange(PlayerFieldChange<bool>),
    SquadAdded(SquadDeltaEvent),
    SquadUpdated(SquadUpdatedEvent),
    SquadDisbanded(SquadDeltaEvent),
    LayerChanged(LayerChangedEvent),
    ServerStarting(LifecycleEvent),
    ServerReady(LifecycleEvent),
    ServerStopping(LifecycleEvent),
    ServerStopped(LifecycleEvent),
    ServerError(LifecycleEvent),
    RconConnected(LifecycleEvent),
    RconDisconnected(LifecycleEvent),
    RconError(LifecycleEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PlayerConnected(_) => EventKind::PlayerConnected,
            Event::PlayerDisconnected(_) => EventKind::PlayerDisconnected,
            Event::JoinSucceeded(_) => EventKind::JoinSucceeded,
            Event::PlayerPossess(_) => EventKind::PlayerPossess,
            Event::PlayerUnpossess(_) => EventKind::PlayerUnpossess,
            Event::PlayerDamaged(_) => EventKind::PlayerDamaged,
            Event::PlayerWounded(_) => EventKind::PlayerWounded,
            Event::PlayerDied(_) => EventKind::PlayerDied,
            Event::PlayerRevived(_) => EventKind::PlayerRevived,
            Event::DeployableDamaged(_) => EventKind::DeployableDamaged,
            Event::NewGame(_) => EventKind::NewGame,
            Event::RoundWinner(_) => EventKind::RoundWinner,
            Event::RoundTickets(_) => EventKind::RoundTickets,
            Event::RoundEnded(_) => EventKind::RoundEnded,
            Event::TickRate(_) => EventKind::TickRate,
            Event::AdminBroadcast(_) => EventKind::AdminBroadcast,
            Event::ChatMessage(_) => EventKind::ChatMessage,
            Event::PossessedAdminCamera(_) => EventKind::PossessedAdminCamera,
            Event::UnpossessedAdminCamera(_) => EventKind::UnpossessedAdminCamera,
            Event::PlayerWarned(_) => EventKind::PlayerWarned,
            Event::PlayerKicked(_) => EventKind::PlayerKicked,
            Event::PlayerBanned(_) => EventKind::PlayerBanned,
            Event::SquadCreated(_) => EventKind::SquadCreated,
            Event::PlayerAdded(_) => EventKind::PlayerAdded,
            Event::PlayerRemoved(_) => EventKind::PlayerRemoved,
            Event::PlayerTeamChange(_) => EventKind::PlayerTeamChange,
            Event::PlayerSquadChange(_) => EventKind::PlayerSquadChange,
            Event::PlayerRoleChange(_) => EventKind::PlayerRoleChange,
            Event::PlayerLeaderChange(_) => EventKind::PlayerLeaderChange,
            Event::SquadAdded(_) => EventKind::SquadAdded,
            Event::SquadUpdated(_) => EventKind::SquadUpdated,
            Event::SquadDisbanded(_) => EventKind::SquadDisbanded,
            Event::LayerChanged(_) => EventKind::LayerChanged,
            Event::ServerStarting(_) => EventKind::ServerStarting,
            Event::ServerReady(_) => EventKind::ServerReady,
            Event::ServerStopping(_) => EventKind::ServerStopping,
            Event::ServerStopped(_) => EventKind::ServerStopped,
            Event::ServerError(_) => EventKind::ServerError,
            Event::RconConnected(_) => EventKind::RconConnected,
            Event::RconDisconnected(_) => EventKind::RconDisconnected,
            Event::RconError(_) => EventKind::RconError,
        }
    }

    /// Convenience constructor for the lifecycle variants, which all carry
    /// the same payload shape.
    pub fn lifecycle(kind: EventKind, message: Option<String>) -> Event {
        let payload = LifecycleEvent {
            time: Utc::now(),
            message,
        };
        match kind {
            EventKind::ServerStarting => Event::ServerStarting(payload),
            EventKind::ServerReady => Event::ServerReady(payload),
            EventKind::ServerStopping => Event::ServerStopping(payload),
            EventKind::ServerStopped => Event::ServerStopped(payload),
            EventKind::ServerError => Event::ServerError(payload),
            EventKind::RconConnected => Event::RconConnected(payload),
            EventKind::RconDisconnected => Event::RconDisconnected(payload),
            EventKind::RconError => Event::RconError(payload),
            other => panic!("{other} is not a lifecycle kind"),
        }
    }
}
