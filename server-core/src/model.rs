//! The snapshot entities the state services maintain and the events carry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{ControllerId, EosId, PlatformId, SessionId, SquadId, TeamId};

/// One player as currently known. Created when first observed in any RCON or
/// log record; the EOS id never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub eos_id: EosId,
    pub platform_id: Option<PlatformId>,
    /// The server-assigned slot; changes across disconnect/reconnect.
    pub session_id: SessionId,
    pub name: String,
    /// The name as it appears in log lines (clan tags stripped by the server).
    pub name_suffix: Option<String>,
    pub team_id: Option<TeamId>,
    pub squad_id: Option<SquadId>,
    pub is_squad_leader: bool,
    pub role: Option<String>,
    pub controller: Option<ControllerId>,
}

impl Player {
    /// Whether the player currently sits in a squad. A squad always implies a
    /// team.
    pub fn in_squad(&self) -> bool {
        self.squad_id.is_some()
    }
}

/// One squad, keyed by (team id, squad id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Squad {
    pub team_id: TeamId,
    pub squad_id: SquadId,
    pub name: String,
    pub size: u32,
    pub locked: bool,
    pub creator_name: String,
    pub creator_eos_id: Option<EosId>,
    pub creator_platform_id: Option<PlatformId>,
}

impl Squad {
    pub fn key(&self) -> (TeamId, SquadId) {
        (self.team_id, self.squad_id)
    }
}

/// A map+mode+version combination, e.g. `Narva_RAAS_v1`. The non-name fields
/// are best-effort parsed and stay `None` when the name does not follow the
/// usual pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
    pub name: String,
    pub level: Option<String>,
    pub game_mode: Option<String>,
    pub version: Option<String>,
    pub team1_faction: Option<String>,
    pub team2_faction: Option<String>,
    pub is_night: bool,
    pub size_class: Option<String>,
}

impl Layer {
    /// Splits a layer name like `Narva_Invasion_v2` or `Sumari_AAS_v1_Night`
    /// into its parts. Unrecognized shapes keep only the name.
    pub fn from_name(name: &str) -> Self {
        let mut layer = Layer {
            name: name.to_owned(),
            level: None,
            game_mode: None,
            version: None,
            team1_faction: None,
            team2_faction: None,
            is_night: name.to_ascii_lowercase().contains("night"),
            size_class: None,
        };
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() >= 3 {
            layer.level = Some(parts[0].to_owned());
            layer.game_mode = Some(parts[1].to_owned());
            if let Some(version) = parts
                .iter()
                .skip(2)
                .find(|p| p.len() >= 2 && p.starts_with('v') && p[1..].bytes().all(|b| b.is_ascii_digit()))
            {
                layer.version = Some((*version).to_owned());
            }
            for part in &parts[2..] {
                match part.to_ascii_lowercase().as_str() {
                    "small" | "medium" | "large" => layer.size_class = Some((*part).to_owned()),
                    _ => {}
                }
            }
        }
        layer
    }
}

/// Coarse server facts collected by the `server_info` scheduler task plus the
/// tick rate observed in the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub max_players: Option<u32>,
    pub player_count: Option<u32>,
    pub public_queue: Option<u32>,
    pub reserved_queue: Option<u32>,
    pub tick_rate: Option<f32>,
    pub updated_at: Option<DateTime<Utc>>,
}
