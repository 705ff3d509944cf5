//! Parsers that turn RCON response text and unsolicited chat-frame bodies
//! into typed data. The patterns are compiled once and tolerate the id-block
//! reorderings seen across server builds.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::error::ParseError;
use crate::events::{
    AdminCameraEvent, ChatChannel, ChatMessageEvent, Event, OnlineIds, PlayerBannedEvent,
    PlayerKickedEvent, PlayerWarnedEvent, SquadCreatedEvent,
};
use crate::ids::{EosId, PlatformId, SessionId, SquadId, TeamId};

/// One row of a `ListPlayers` response.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub session_id: SessionId,
    pub eos_id: EosId,
    pub platform_id: Option<PlatformId>,
    pub name: String,
    pub team_id: Option<TeamId>,
    pub squad_id: Option<SquadId>,
    pub is_leader: bool,
    pub role: Option<String>,
}

/// One row of a `ListSquads` response, with the team header it sat under.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadInfo {
    pub team_id: TeamId,
    pub team_name: String,
    pub squad_id: SquadId,
    pub name: String,
    pub size: u32,
    pub locked: bool,
    pub creator_name: String,
    pub creator_eos_id: Option<EosId>,
    pub creator_platform_id: Option<PlatformId>,
}

/// The answer to `ShowCurrentMap` / `ShowNextMap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub level: Option<String>,
    /// Absent when the next layer is still `To be voted`.
    pub layer: Option<String>,
    pub factions: Option<(String, String)>,
}

/// Lenient view of the `ShowServerInfo` JSON blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfoResponse {
    pub name: Option<String>,
    pub max_players: Option<u32>,
    pub player_count: Option<u32>,
    pub public_queue: Option<u32>,
    pub reserved_queue: Option<u32>,
}

static EOS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EOS:\s*([0-9a-f]{32})").expect("eos pattern"));
static STEAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"steam:\s*(\d{17})").expect("steam pattern"));

/// Pulls the EOS/steam pair out of an id block, in either order. Invalid
/// pieces simply stay absent.
pub fn parse_online_ids(text: &str) -> OnlineIds {
    let eos = EOS_RE
        .captures(text)
        .and_then(|c| EosId::parse(&c[1]).ok());
    let platform = STEAM_RE
        .captures(text)
        .and_then(|c| PlatformId::parse(&c[1]).ok());
    OnlineIds { eos, platform }
}

static PLAYER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^ID:\s*(\d+)\s*\|\s*Online IDs:([^|]+)\|\s*Name:\s*(.*?)\s*\|\s*Team ID:\s*(\d+|N/A)\s*\|\s*Squad ID:\s*(\d+|N/A)\s*\|\s*Is Leader:\s*(True|False)\s*\|\s*Role:\s*(.*?)\s*$",
    )
    .expect("player line pattern")
});

/// Parses a `ListPlayers` response. Lines that do not match (section headers,
/// blanks) are skipped; the recently-disconnected section is not entered.
/// Ordering mirrors the server output.
pub fn parse_list_players(response: &str) -> Vec<PlayerInfo> {
    let mut players = Vec::new();
    for line in response.lines() {
        let line = line.trim();
        if line.starts_with("----- Recently Disconnected Players") {
            break;
        }
        let Some(caps) = PLAYER_LINE_RE.captures(line) else {
            continue;
        };
        let Ok(session_id) = caps[1].parse::<i64>().map_err(|_| ()).and_then(|v| {
            SessionId::new(v).map_err(|_| ())
        }) else {
            tracing::trace!(line, "Player row with out-of-range id.");
            continue;
        };
        let ids = parse_online_ids(&caps[2]);
        let Some(eos_id) = ids.eos else {
            tracing::trace!(line, "Player row without a valid EOS id.");
            continue;
        };
        let team_id = match &caps[4] {
            "N/A" => None,
            digits => digits.parse::<i64>().ok().and_then(|v| TeamId::new(v).ok()),
        };
        let squad_id = match &caps[5] {
            "N/A" => None,
            digits => digits
                .parse::<i64>()
                .ok()
                .and_then(|v| SquadId::new(v).ok()),
        };
        let role = match caps[7].trim() {
            "" => None,
            role => Some(role.to_owned()),
        };
        players.push(PlayerInfo {
            session_id,
            eos_id,
            platform_id: ids.platform,
            name: caps[3].to_owned(),
            team_id,
            squad_id,
            is_leader: &caps[6] == "True",
            role,
        });
    }
    players
}

static TEAM_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Team ID:\s*(\d+)\s*\((.*)\)\s*$").expect("team header pattern"));

static SQUAD_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^ID:\s*(\d+)\s*\|\s*Name:\s*(.*?)\s*\|\s*Size:\s*(\d+)\s*\|\s*Locked:\s*(True|False)\s*\|\s*Creator Name:\s*(.*?)\s*\|\s*Creator Online IDs:(.+)$",
    )
    .expect("squad line pattern")
});

/// Parses a `ListSquads` response. Squad rows inherit the most recent team
/// header; rows under an unknown team id are dropped.
pub fn parse_list_squads(response: &str) -> Vec<SquadInfo> {
    let mut squads = Vec::new();
    let mut current_team: Option<(TeamId, String)> = None;
    for line in response.lines() {
        let line = line.trim();
        if let Some(caps) = TEAM_HEADER_RE.captures(line) {
            current_team = caps[1]
                .parse::<i64>()
                .ok()
                .and_then(|v| TeamId::new(v).ok())
                .map(|team| (team, caps[2].to_owned()));
            continue;
        }
        let Some(caps) = SQUAD_LINE_RE.captures(line) else {
            continue;
        };
        let Some((team_id, team_name)) = current_team.clone() else {
            continue;
        };
        let Ok(squad_id) = caps[1]
            .parse::<i64>()
            .map_err(|_| ())
            .and_then(|v| SquadId::new(v).map_err(|_| ()))
        else {
            continue;
        };
        let Ok(size) = caps[3].parse::<u32>() else {
            continue;
        };
        let ids = parse_online_ids(&caps[6]);
        squads.push(SquadInfo {
            team_id,
            team_name,
            squad_id,
            name: caps[2].to_owned(),
            size,
            locked: &caps[4] == "True",
            creator_name: caps[5].to_owned(),
            creator_eos_id: ids.eos,
            creator_platform_id: ids.platform,
        });
    }
    squads
}

static CURRENT_MAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Current level is (.*?), layer is ([^,]*?)(?:, factions (\S+)\s+(\S+))?\s*$")
        .expect("current map pattern")
});

static NEXT_MAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Next level is (.*?), layer is ([^,]*?)(?:, factions (\S+)\s+(\S+))?\s*$")
        .expect("next map pattern")
});

fn map_info_from(caps: regex::Captures<'_>) -> MapInfo {
    let level = match caps[1].trim() {
        "" => None,
        level => Some(level.to_owned()),
    };
    let layer = match caps[2].trim() {
        "" | "To be voted" => None,
        layer => Some(layer.to_owned()),
    };
    let factions = match (caps.get(3), caps.get(4)) {
        (Some(one), Some(two)) => Some((one.as_str().to_owned(), two.as_str().to_owned())),
        _ => None,
    };
    MapInfo {
        level,
        layer,
        factions,
    }
}

pub fn parse_current_map(response: &str) -> Result<MapInfo, ParseError> {
    CURRENT_MAP_RE
        .captures(response.trim())
        .map(map_info_from)
        .ok_or_else(|| {
            ParseError::new(
                "ShowCurrentMap",
                "Current level is <level>, layer is <layer>",
                response,
            )
        })
}

pub fn parse_next_map(response: &str) -> Result<MapInfo, ParseError> {
    NEXT_MAP_RE
        .captures(response.trim())
        .map(map_info_from)
        .ok_or_else(|| {
            ParseError::new(
                "ShowNextMap",
                "Next level is <level>, layer is <layer>",
                response,
            )
        })
}

/// Parses the `ShowServerInfo` JSON. Numeric fields arrive as numbers or as
/// quoted strings depending on the build; both are accepted.
pub fn parse_server_info(response: &str) -> Result<ServerInfoResponse, ParseError> {
    let value: serde_json::Value = serde_json::from_str(response.trim())
        .map_err(|_| ParseError::new("ShowServerInfo", "a JSON object", response))?;
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::new("ShowServerInfo", "a JSON object", response))?;

    let get_u32 = |key: &str| -> Option<u32> {
        match object.get(key)? {
            serde_json::Value::Number(n) => n.as_u64().map(|v| v as u32),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    Ok(ServerInfoResponse {
        name: object
            .get("ServerName_s")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        max_players: get_u32("MaxPlayers"),
        player_count: get_u32("PlayerCount_I"),
        public_queue: get_u32("PublicQueue_I"),
        reserved_queue: get_u32("ReservedQueue_I"),
    })
}

static CHAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(ChatAll|ChatTeam|ChatSquad|ChatAdmin)\] \[Online IDs:([^\]]+)\] (.+?) : (.*)$")
        .expect("chat pattern")
});
static CAMERA_POSSESSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Online I[Dd]s:([^\]]+)\] (.+) has possessed admin camera\.?$")
        .expect("camera possessed pattern")
});
static CAMERA_UNPOSSESSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Online I[Dd]s:([^\]]+)\] (.+) has unpossessed admin camera\.?$")
        .expect("camera unpossessed pattern")
});
static WARNED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^Remote admin has warned player (.*)\. Message was "(.*)"$"#)
        .expect("warned pattern")
});
static KICKED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Kicked player ([0-9]+)\. \[Online IDs=([^\]]+)\] (.*)$").expect("kicked pattern")
});
static BANNED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Banned player ([0-9]+)\. \[steamid=(.*?)\] (.*) for interval (.*)$")
        .expect("banned pattern")
});
static SQUAD_CREATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+) \(Online IDs:([^)]+)\) has created Squad (\d+) \(Squad Name: (.+)\) on (.+)$")
        .expect("squad created pattern")
});

/// Turns one unsolicited chat-frame body into its typed event. Unrecognized
/// bodies are logged at trace and yield nothing.
pub fn parse_chat_frame(body: &str) -> Option<Event> {
    let time = Utc::now();
    let raw = body.to_owned();

    if let Some(caps) = CHAT_RE.captures(body) {
        let channel = match &caps[1] {
            "ChatAll" => ChatChannel::All,
            "ChatTeam" => ChatChannel::Team,
            "ChatSquad" => ChatChannel::Squad,
            _ => ChatChannel::Admin,
        };
        return Some(Event::ChatMessage(ChatMessageEvent {
            time,
            channel,
            name: caps[3].to_owned(),
            message: caps[4].to_owned(),
            ids: parse_online_ids(&caps[2]),
            raw,
        }));
    }
    if let Some(caps) = CAMERA_POSSESSED_RE.captures(body) {
        return Some(Event::PossessedAdminCamera(AdminCameraEvent {
            time,
            name: caps[2].to_owned(),
            ids: parse_online_ids(&caps[1]),
            raw,
        }));
    }
    if let Some(caps) = CAMERA_UNPOSSESSED_RE.captures(body) {
        return Some(Event::UnpossessedAdminCamera(AdminCameraEvent {
            time,
            name: caps[2].to_owned(),
            ids: parse_online_ids(&caps[1]),
            raw,
        }));
    }
    if let Some(caps) = WARNED_RE.captures(body) {
        return Some(Event::PlayerWarned(PlayerWarnedEvent {
            time,
            name: caps[1].to_owned(),
            reason: caps[2].to_owned(),
            raw,
        }));
    }
    if let Some(caps) = KICKED_RE.captures(body) {
        let session_id = caps[1]
            .parse::<i64>()
            .ok()
            .and_then(|v| SessionId::new(v).ok());
        return Some(Event::PlayerKicked(PlayerKickedEvent {
            time,
            session_id,
            name: caps[3].to_owned(),
            ids: parse_online_ids(&caps[2]),
            raw,
        }));
    }
    if let Some(caps) = BANNED_RE.captures(body) {
        let session_id = caps[1]
            .parse::<i64>()
            .ok()
            .and_then(|v| SessionId::new(v).ok());
        return Some(Event::PlayerBanned(PlayerBannedEvent {
            time,
            session_id,
            name: caps[3].to_owned(),
            platform: PlatformId::parse(caps[2].trim()).ok(),
            interval: caps[4].to_owned(),
            raw,
        }));
    }
    if let Some(caps) = SQUAD_CREATED_RE.captures(body) {
        let squad_id = caps[3]
            .parse::<i64>()
            .ok()
            .and_then(|v| SquadId::new(v).ok())?;
        return Some(Event::SquadCreated(SquadCreatedEvent {
            time,
            creator_name: caps[1].to_owned(),
            creator_ids: parse_online_ids(&caps[2]),
            squad_id,
            squad_name: caps[4].to_owned(),
            team_name: caps[5].to_owned(),
            raw,
        }));
    }

    tracing::trace!(body, "Unrecognized chat frame body.");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS_A: &str = "0002a10186d9414496bf20d22d3860ba";
    const STEAM_A: &str = "76561198012345678";

    #[test]
    fn online_ids_tolerate_reordering() {
        let forward = parse_online_ids(&format!(" EOS: {EOS_A} steam: {STEAM_A}"));
        let reversed = parse_online_ids(&format!(" steam: {STEAM_A} EOS: {EOS_A}"));
        assert_eq!(forward, reversed);
        assert_eq!(forward.eos.unwrap().as_str(), EOS_A);
        assert_eq!(forward.platform.unwrap().as_str(), STEAM_A);

        let eos_only = parse_online_ids(&format!("EOS: {EOS_A}"));
        assert!(eos_only.platform.is_none());
    }

    #[test]
    fn list_players_parses_rows_and_skips_disconnected_section() {
        let response = format!(
            "----- Active Players -----\n\
             ID: 0 | Online IDs: EOS: {EOS_A} steam: {STEAM_A} | Name: [TAG] Yuri | Team ID: 1 | Squad ID: 2 | Is Leader: True | Role: USA_Rifleman_01\n\
             ID: 1 | Online IDs: EOS: 0002a10186d9414496bf20d22d3860bb | Name: Console | Team ID: 2 | Squad ID: N/A | Is Leader: False | Role: RGF_Medic_01\n\
             ----- Recently Disconnected Players [Max of 15] -----\n\
             ID: 5 | Online IDs: EOS: 0002a10186d9414496bf20d22d3860bc | Name: Gone | Team ID: 1 | Squad ID: N/A | Is Leader: False | Role: USA_Rifleman_01\n"
        );
        let players = parse_list_players(&response);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "[TAG] Yuri");
        assert_eq!(players[0].team_id, Some(TeamId::ONE));
        assert_eq!(players[0].squad_id.unwrap().value(), 2);
        assert!(players[0].is_leader);
        assert!(players[0].platform_id.is_some());
        assert_eq!(players[1].squad_id, None);
        assert!(players[1].platform_id.is_none());
    }

    #[test]
    fn list_squads_inherits_team_headers_and_drops_unknown_teams() {
        let response = format!(
            "----- Active Squads -----\n\
             Team ID: 1 (US Army)\n\
             ID: 1 | Name: CMD Squad | Size: 4 | Locked: True | Creator Name: Alpha | Creator Online IDs: EOS: {EOS_A} steam: {STEAM_A}\n\
             Team ID: 3 (Broken)\n\
             ID: 1 | Name: Ghost | Size: 1 | Locked: False | Creator Name: Nobody | Creator Online IDs: EOS: {EOS_A}\n\
             Team ID: 2 (Russian Ground Forces)\n\
             ID: 2 | Name: INF | Size: 9 | Locked: False | Creator Name: Bravo | Creator Online IDs: EOS: 0002a10186d9414496bf20d22d3860bb\n"
        );
        let squads = parse_list_squads(&response);
        assert_eq!(squads.len(), 2);
        assert_eq!(squads[0].team_id, TeamId::ONE);
        assert_eq!(squads[0].team_name, "US Army");
        assert!(squads[0].locked);
        assert_eq!(squads[1].team_id, TeamId::TWO);
        assert_eq!(squads[1].squad_id.value(), 2);
    }

    #[test]
    fn current_and_next_map_parse_with_and_without_factions() {
        let current = parse_current_map("Current level is Narva, layer is Narva_RAAS_v1").unwrap();
        assert_eq!(current.level.as_deref(), Some("Narva"));
        assert_eq!(current.layer.as_deref(), Some("Narva_RAAS_v1"));
        assert!(current.factions.is_none());

        let with_factions =
            parse_current_map("Current level is Narva, layer is Narva_RAAS_v1, factions USA RGF")
                .unwrap();
        assert_eq!(
            with_factions.factions,
            Some(("USA".to_owned(), "RGF".to_owned()))
        );

        let next = parse_next_map("Next level is Gorodok, layer is To be voted").unwrap();
        assert_eq!(next.layer, None);

        assert!(parse_current_map("garbage").is_err());
    }

    #[test]
    fn server_info_accepts_numbers_and_strings() {
        let response = r#"{"ServerName_s":"Test Server","MaxPlayers":98,"PlayerCount_I":"77","PublicQueue_I":"3","ReservedQueue_I":0}"#;
        let info = parse_server_info(response).unwrap();
        assert_eq!(info.name.as_deref(), Some("Test Server"));
        assert_eq!(info.max_players, Some(98));
        assert_eq!(info.player_count, Some(77));
        assert_eq!(info.public_queue, Some(3));
        assert_eq!(info.reserved_queue, Some(0));

        assert!(parse_server_info("not json").is_err());
    }

    #[test]
    fn chat_frames_become_typed_events() {
        let chat = parse_chat_frame(&format!(
            "[ChatTeam] [Online IDs:EOS: {EOS_A} steam: {STEAM_A}] Yuri : push B"
        ))
        .unwrap();
        match chat {
            Event::ChatMessage(event) => {
                assert_eq!(event.channel, ChatChannel::Team);
                assert_eq!(event.name, "Yuri");
                assert_eq!(event.message, "push B");
                assert!(event.ids.eos.is_some());
            }
            other => panic!("wrong event {other:?}"),
        }

        let camera = parse_chat_frame(&format!(
            "[Online Ids:EOS: {EOS_A} steam: {STEAM_A}] Admin has possessed admin camera."
        ))
        .unwrap();
        assert!(matches!(camera, Event::PossessedAdminCamera(_)));

        let warned =
            parse_chat_frame("Remote admin has warned player Yuri. Message was \"stop it\"")
                .unwrap();
        match warned {
            Event::PlayerWarned(event) => assert_eq!(event.reason, "stop it"),
            other => panic!("wrong event {other:?}"),
        }

        let banned = parse_chat_frame(&format!(
            "Banned player 12. [steamid={STEAM_A}] Yuri for interval 1d"
        ))
        .unwrap();
        match banned {
            Event::PlayerBanned(event) => {
                assert_eq!(event.session_id.unwrap().value(), 12);
                assert_eq!(event.interval, "1d");
            }
            other => panic!("wrong event {other:?}"),
        }

        let squad = parse_chat_frame(&format!(
            "Yuri (Online IDs: EOS: {EOS_A} steam: {STEAM_A}) has created Squad 3 (Squad Name: INF) on US Army"
        ))
        .unwrap();
        match squad {
            Event::SquadCreated(event) => {
                assert_eq!(event.squad_id.value(), 3);
                assert_eq!(event.squad_name, "INF");
                assert_eq!(event.team_name, "US Army");
            }
            other => panic!("wrong event {other:?}"),
        }

        assert!(parse_chat_frame("something unrecognizable").is_none());
    }
}
