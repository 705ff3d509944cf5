//! The typed command surface over the raw engine. Bodies are formatted from
//! typed arguments; free-text parts are sanitized so a message can never
//! break the command line it is embedded in.

use crate::error::CommandError;
use crate::ids::{EosId, PlatformId, SessionId, SquadId, TeamId};
use crate::rcon::engine::RconEngine;
use crate::rcon::parsers::{self, MapInfo, PlayerInfo, ServerInfoResponse, SquadInfo};

/// How a player is addressed in an admin command. Session ids go out as bare
/// decimals, the stable ids verbatim in quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerTarget {
    Session(SessionId),
    Eos(EosId),
    Platform(PlatformId),
}

impl PlayerTarget {
    fn serialize(&self) -> String {
        match self {
            PlayerTarget::Session(id) => id.to_string(),
            PlayerTarget::Eos(id) => format!("\"{id}\""),
            PlayerTarget::Platform(id) => format!("\"{id}\""),
        }
    }
}

/// Strips control characters and swaps double quotes for single ones so the
/// message cannot terminate the quoted command argument early.
fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' { '\'' } else { c })
        .collect()
}

impl RconEngine {
    /// Sends a warning popup to one player.
    pub async fn warn(&self, target: &PlayerTarget, message: &str) -> Result<(), CommandError> {
        self.execute(&format!(
            "AdminWarn {} {}",
            target.serialize(),
            sanitize_message(message)
        ))
        .await?;
        Ok(())
    }

    /// Kicks a player with a reason.
    pub async fn kick(&self, target: &PlayerTarget, reason: &str) -> Result<(), CommandError> {
        self.execute(&format!(
            "AdminKick {} {}",
            target.serialize(),
            sanitize_message(reason)
        ))
        .await?;
        Ok(())
    }

    /// Bans a player. `interval` follows the server's convention, e.g. `0`
    /// for permanent, `1d`, `1M`.
    pub async fn ban(
        &self,
        target: &PlayerTarget,
        interval: &str,
        reason: &str,
    ) -> Result<(), CommandError> {
        self.execute(&format!(
            "AdminBan {} {} {}",
            target.serialize(),
            interval,
            sanitize_message(reason)
        ))
        .await?;
        Ok(())
    }

    /// Shows a message to every connected player.
    pub async fn broadcast(&self, message: &str) -> Result<(), CommandError> {
        self.execute(&format!("AdminBroadcast {}", sanitize_message(message)))
            .await?;
        Ok(())
    }

    /// Ends the current match and switches to the named layer.
    pub async fn change_layer(&self, layer: &str) -> Result<(), CommandError> {
        self.execute(&format!("AdminChangeLayer {layer}")).await?;
        Ok(())
    }

    /// Sets the layer the server rotates to after the current match.
    pub async fn set_next_layer(&self, layer: &str) -> Result<(), CommandError> {
        self.execute(&format!("AdminSetNextLayer {layer}")).await?;
        Ok(())
    }

    /// Moves a player to the opposing team.
    pub async fn force_team_change(&self, target: &PlayerTarget) -> Result<(), CommandError> {
        self.execute(&format!("AdminForceTeamChange {}", target.serialize()))
            .await?;
        Ok(())
    }

    /// Disbands a squad by its (team, squad) key.
    pub async fn disband_squad(&self, team: TeamId, squad: SquadId) -> Result<(), CommandError> {
        self.execute(&format!("AdminDisbandSquad {team} {squad}"))
            .await?;
        Ok(())
    }

    /// Ends the current match immediately.
    pub async fn end_match(&self) -> Result<(), CommandError> {
        self.execute("AdminEndMatch").await?;
        Ok(())
    }

    /// Restarts the current match.
    pub async fn restart_match(&self) -> Result<(), CommandError> {
        self.execute("AdminRestartMatch").await?;
        Ok(())
    }

    /// The current player list, in server order.
    pub async fn list_players(&self) -> Result<Vec<PlayerInfo>, CommandError> {
        let response = self.execute("ListPlayers").await?;
        Ok(parsers::parse_list_players(&response))
    }

    /// The current squad list, in server order.
    pub async fn list_squads(&self) -> Result<Vec<SquadInfo>, CommandError> {
        let response = self.execute("ListSquads").await?;
        Ok(parsers::parse_list_squads(&response))
    }

    /// Level and layer currently being played.
    pub async fn show_current_map(&self) -> Result<MapInfo, CommandError> {
        let response = self.execute("ShowCurrentMap").await?;
        Ok(parsers::parse_current_map(&response)?)
    }

    /// Level and layer up next; absent while the vote is still open.
    pub async fn show_next_map(&self) -> Result<MapInfo, CommandError> {
        let response = self.execute("ShowNextMap").await?;
        Ok(parsers::parse_next_map(&response)?)
    }

    /// Coarse server facts (name, slots, queues).
    pub async fn show_server_info(&self) -> Result<ServerInfoResponse, CommandError> {
        let response = self.execute("ShowServerInfo").await?;
        Ok(parsers::parse_server_info(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_targets_are_bare_decimals_stable_ids_quoted() {
        let session = PlayerTarget::Session(SessionId::new(7).unwrap());
        assert_eq!(session.serialize(), "7");
        let eos =
            PlayerTarget::Eos(EosId::parse("0002a10186d9414496bf20d22d3860ba").unwrap());
        assert_eq!(
            eos.serialize(),
            "\"0002a10186d9414496bf20d22d3860ba\""
        );
        let steam = PlayerTarget::Platform(PlatformId::parse("76561198012345678").unwrap());
        assert_eq!(steam.serialize(), "\"76561198012345678\"");
    }

    #[test]
    fn messages_lose_control_characters_and_double_quotes() {
        assert_eq!(
            sanitize_message("say \"hi\"\r\n\tnow"),
            "say 'hi'now"
        );
        assert_eq!(sanitize_message("plain"), "plain");
    }
}
