//! The player snapshot. Keyed by EOS id with secondary indices by platform
//! id, session id and name; reconciliation folds an RCON player list into
//! add/change/remove deltas.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use crate::bus::EventBus;
use crate::events::{Event, PlayerDeltaEvent, PlayerFieldChange};
use crate::ids::{ControllerId, EosId, PlatformId, SessionId, TeamId};
use crate::model::Player;
use crate::rcon::parsers::PlayerInfo;

struct PlayerMap {
    players: HashMap<EosId, Player>,
    by_platform: HashMap<PlatformId, EosId>,
    by_session: HashMap<SessionId, EosId>,
    /// Players for whom a disconnect log record was seen.
    disconnected: HashSet<EosId>,
    /// Players absent from the previous poll, surviving one grace tick.
    grace: HashSet<EosId>,
}

/// The player service. A player is created when first observed, and removed
/// only once it is gone from the RCON list, a disconnect was seen, and one
/// grace tick has passed.
pub struct PlayerService {
    bus: EventBus,
    inner: Mutex<PlayerMap>,
}

impl PlayerService {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            inner: Mutex::new(PlayerMap {
                players: HashMap::new(),
                by_platform: HashMap::new(),
                by_session: HashMap::new(),
                disconnected: HashSet::new(),
                grace: HashSet::new(),
            }),
        }
    }

    /// Reconciles one `ListPlayers` snapshot. Emits, in order: field changes
    /// per player (team, squad, role, leader), then additions, then removals.
    /// Applying the same snapshot twice yields no deltas the second time.
    pub(crate) fn update_from_rcon(&self, observed: &[PlayerInfo]) {
        let time = Utc::now();
        let mut changes: Vec<Event> = Vec::new();
        let mut added: Vec<Event> = Vec::new();
        let mut removed: Vec<Event> = Vec::new();
        {
            let mut inner = self.inner.lock().expect("player map lock poisoned");
            let mut seen: HashSet<EosId> = HashSet::with_capacity(observed.len());

            for info in observed {
                seen.insert(info.eos_id.clone());
                // A squad assignment without a team cannot be represented.
                let squad_id = if info.team_id.is_some() {
                    info.squad_id
                } else {
                    None
                };
                match inner.players.get(&info.eos_id) {
                    None => {
                        let player = Player {
                            eos_id: info.eos_id.clone(),
                            platform_id: info.platform_id.clone(),
                            session_id: info.session_id,
                            name: info.name.clone(),
                            name_suffix: None,
                            team_id: info.team_id,
                            squad_id,
                            is_squad_leader: info.is_leader,
                            role: info.role.clone(),
                            controller: None,
                        };
                        inner.index(&player);
                        inner.players.insert(info.eos_id.clone(), player.clone());
                        added.push(Event::PlayerAdded(PlayerDeltaEvent { time, player }));
                    }
                    Some(existing) => {
                        let mut player = existing.clone();
                        let old_team = player.team_id;
                        let old_squad = player.squad_id;
                        let old_role = player.role.clone();
                        let old_leader = player.is_squad_leader;

                        player.session_id = info.session_id;
                        player.name = info.name.clone();
                        if info.platform_id.is_some() {
                            player.platform_id = info.platform_id.clone();
                        }
                        player.team_id = info.team_id;
                        player.squad_id = squad_id;
                        player.is_squad_leader = info.is_leader;
                        player.role = info.role.clone();

                        if old_team != player.team_id {
                            changes.push(Event::PlayerTeamChange(PlayerFieldChange {
                                time,
                                player: player.clone(),
                                old: old_team,
                                new: player.team_id,
                            }));
                        }
                        if old_squad != player.squad_id {
                            changes.push(Event::PlayerSquadChange(PlayerFieldChange {
                                time,
                                player: player.clone(),
                                old: old_squad,
                                new: player.squad_id,
                            }));
                        }
                        if old_role != player.role {
                            changes.push(Event::PlayerRoleChange(PlayerFieldChange {
                                time,
                                player: player.clone(),
                                old: old_role,
                                new: player.role.clone(),
                            }));
                        }
                        if old_leader != player.is_squad_leader {
                            changes.push(Event::PlayerLeaderChange(PlayerFieldChange {
                                time,
                                player: player.clone(),
                                old: old_leader,
                                new: player.is_squad_leader,
                            }));
                        }
                        inner.index(&player);
                        inner.players.insert(info.eos_id.clone(), player);
                    }
                }
                // Present again: forget any disconnect bookkeeping.
                inner.grace.remove(&info.eos_id);
                inner.disconnected.remove(&info.eos_id);
            }

            // Absent players leave only after a disconnect record plus one
            // grace tick; a pure list hiccup keeps them around.
            let absent: Vec<EosId> = inner
                .players
                .keys()
                .filter(|eos| !seen.contains(*eos))
                .cloned()
                .collect();
            for eos in absent {
                if !inner.disconnected.contains(&eos) {
                    continue;
                }
                if inner.grace.insert(eos.clone()) {
                    continue;
                }
                if let Some(player) = inner.players.remove(&eos) {
                    inner.unindex(&player);
                    inner.disconnected.remove(&eos);
                    inner.grace.remove(&eos);
                    removed.push(Event::PlayerRemoved(PlayerDeltaEvent { time, player }));
                }
            }
        }
        for event in changes.into_iter().chain(added).chain(removed) {
            self.bus.emit(&event);
        }
    }

    /// Marks that a disconnect log record was seen for this player.
    pub(crate) fn note_disconnect(&self, eos: &EosId) {
        let mut inner = self.inner.lock().expect("player map lock poisoned");
        if inner.players.contains_key(eos) {
            inner.disconnected.insert(eos.clone());
        }
    }

    /// Records the engine controller observed in a connect log record.
    pub(crate) fn note_controller(&self, eos: &EosId, controller: &ControllerId) {
        let mut inner = self.inner.lock().expect("player map lock poisoned");
        if let Some(player) = inner.players.get_mut(eos) {
            player.controller = Some(controller.clone());
        }
    }

    /// Records the log-side name suffix observed in a possess record.
    pub(crate) fn note_name_suffix(&self, eos: &EosId, suffix: &str) {
        let mut inner = self.inner.lock().expect("player map lock poisoned");
        if let Some(player) = inner.players.get_mut(eos) {
            player.name_suffix = Some(suffix.to_owned());
        }
    }

    pub fn get(&self, eos: &EosId) -> Option<Player> {
        self.inner
            .lock()
            .expect("player map lock poisoned")
            .players
            .get(eos)
            .cloned()
    }

    pub fn get_by_platform(&self, platform: &PlatformId) -> Option<Player> {
        let inner = self.inner.lock().expect("player map lock poisoned");
        let eos = inner.by_platform.get(platform)?;
        inner.players.get(eos).cloned()
    }

    pub fn get_by_session(&self, session: SessionId) -> Option<Player> {
        let inner = self.inner.lock().expect("player map lock poisoned");
        let eos = inner.by_session.get(&session)?;
        inner.players.get(eos).cloned()
    }

    /// Case-insensitive substring match over player names; first hit wins.
    pub fn find_by_name(&self, fragment: &str) -> Option<Player> {
        let fragment = fragment.to_lowercase();
        let inner = self.inner.lock().expect("player map lock poisoned");
        inner
            .players
            .values()
            .find(|player| player.name.to_lowercase().contains(&fragment))
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("player map lock poisoned").players.len()
    }

    pub fn all(&self) -> Vec<Player> {
        self.inner
            .lock()
            .expect("player map lock poisoned")
            .players
            .values()
            .cloned()
            .collect()
    }

    pub fn by_team(&self, team: TeamId) -> Vec<Player> {
        self.inner
            .lock()
            .expect("player map lock poisoned")
            .players
            .values()
            .filter(|player| player.team_id == Some(team))
            .cloned()
            .collect()
    }
}

impl PlayerMap {
    fn index(&mut self, player: &Player) {
        if let Some(platform) = &player.platform_id {
            self.by_platform.insert(platform.clone(), player.eos_id.clone());
        }
        // Session slots get reused; drop a stale mapping first.
        self.by_session.retain(|_, eos| *eos != player.eos_id);
        self.by_session.insert(player.session_id, player.eos_id.clone());
    }

    fn unindex(&mut self, player: &Player) {
        if let Some(platform) = &player.platform_id {
            self.by_platform.remove(platform);
        }
        self.by_session.retain(|_, eos| *eos != player.eos_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Arc;

    const EOS_A: &str = "0002a10186d9414496bf20d22d3860ba";
    const EOS_B: &str = "0002a10186d9414496bf20d22d3860bb";

    fn info(eos: &str, session: i64, team: Option<i64>, squad: Option<i64>) -> PlayerInfo {
        PlayerInfo {
            session_id: SessionId::new(session).unwrap(),
            eos_id: EosId::parse(eos).unwrap(),
            platform_id: None,
            name: format!("player-{}", &eos[30..]),
            team_id: team.map(|t| TeamId::new(t).unwrap()),
            squad_id: squad.map(|s| crate::ids::SquadId::new(s).unwrap()),
            is_leader: false,
            role: Some("USA_Rifleman_01".to_owned()),
        }
    }

    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<EventKind>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::PlayerAdded,
            EventKind::PlayerRemoved,
            EventKind::PlayerTeamChange,
            EventKind::PlayerSquadChange,
            EventKind::PlayerRoleChange,
            EventKind::PlayerLeaderChange,
        ] {
            let seen = seen.clone();
            bus.subscribe(kind, move |event| {
                seen.lock().unwrap().push(event.kind());
            })
            .unwrap();
        }
        (bus, seen)
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let (bus, seen) = recording_bus();
        let service = PlayerService::new(bus);
        let snapshot = vec![info(EOS_A, 0, Some(1), Some(2)), info(EOS_B, 1, Some(2), None)];
        service.update_from_rcon(&snapshot);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::PlayerAdded, EventKind::PlayerAdded]
        );
        seen.lock().unwrap().clear();
        service.update_from_rcon(&snapshot);
        assert!(seen.lock().unwrap().is_empty(), "second pass must be silent");
    }

    #[test]
    fn folded_field_changes_keep_their_order() {
        let (bus, seen) = recording_bus();
        let service = PlayerService::new(bus);
        service.update_from_rcon(&[info(EOS_A, 0, Some(1), Some(2))]);
        seen.lock().unwrap().clear();

        let mut moved = info(EOS_A, 0, Some(2), Some(1));
        moved.is_leader = true;
        moved.role = Some("RGF_Medic_01".to_owned());
        service.update_from_rcon(&[moved]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                EventKind::PlayerTeamChange,
                EventKind::PlayerSquadChange,
                EventKind::PlayerRoleChange,
                EventKind::PlayerLeaderChange,
            ]
        );
    }

    #[test]
    fn session_id_change_alone_is_no_identity_change() {
        let (bus, seen) = recording_bus();
        let service = PlayerService::new(bus);
        service.update_from_rcon(&[info(EOS_A, 0, Some(1), None)]);
        seen.lock().unwrap().clear();

        service.update_from_rcon(&[info(EOS_A, 55, Some(1), None)]);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            service
                .get_by_session(SessionId::new(55).unwrap())
                .unwrap()
                .eos_id
                .as_str(),
            EOS_A
        );
        assert!(service.get_by_session(SessionId::new(0).unwrap()).is_none());
    }

    #[test]
    fn removal_needs_disconnect_and_a_grace_tick() {
        let (bus, seen) = recording_bus();
        let service = PlayerService::new(bus);
        service.update_from_rcon(&[info(EOS_A, 0, Some(1), None)]);
        seen.lock().unwrap().clear();

        // Absent but no disconnect record: stays indefinitely.
        service.update_from_rcon(&[]);
        service.update_from_rcon(&[]);
        assert_eq!(service.count(), 1);

        service.note_disconnect(&EosId::parse(EOS_A).unwrap());
        // First absent tick after the disconnect: grace.
        service.update_from_rcon(&[]);
        assert_eq!(service.count(), 1);
        // Second: removed.
        service.update_from_rcon(&[]);
        assert_eq!(service.count(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::PlayerRemoved]);
    }

    #[test]
    fn squad_without_team_is_dropped() {
        let (bus, _) = recording_bus();
        let service = PlayerService::new(bus);
        service.update_from_rcon(&[info(EOS_A, 0, None, Some(3))]);
        let player = service.get(&EosId::parse(EOS_A).unwrap()).unwrap();
        assert_eq!(player.team_id, None);
        assert_eq!(player.squad_id, None);
    }

    #[test]
    fn name_lookup_is_case_insensitive_and_partial() {
        let (bus, _) = recording_bus();
        let service = PlayerService::new(bus);
        service.update_from_rcon(&[info(EOS_A, 0, Some(1), None)]);
        assert!(service.find_by_name("PLAYER-B").is_some());
        assert!(service.find_by_name("nobody").is_none());
    }
}
