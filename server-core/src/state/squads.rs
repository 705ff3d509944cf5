//! The squad snapshot, keyed by (team id, squad id), with a creator index.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::bus::EventBus;
use crate::events::{Event, SquadCreatedEvent, SquadDeltaEvent, SquadUpdatedEvent};
use crate::ids::{EosId, SquadId, TeamId};
use crate::model::Squad;
use crate::rcon::parsers::SquadInfo;

type SquadKey = (TeamId, SquadId);

struct SquadMap {
    squads: HashMap<SquadKey, Squad>,
    by_creator: HashMap<EosId, Vec<SquadKey>>,
    /// Team display name -> id, learned from the list headers; used to place
    /// squads announced via chat before the next poll.
    team_names: HashMap<String, TeamId>,
}

/// The squad service. At most one squad exists per (team id, squad id).
pub struct SquadService {
    bus: EventBus,
    inner: Mutex<SquadMap>,
}

impl SquadService {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            inner: Mutex::new(SquadMap {
                squads: HashMap::new(),
                by_creator: HashMap::new(),
                team_names: HashMap::new(),
            }),
        }
    }

    /// Reconciles one `ListSquads` snapshot: changed squads first, then new
    /// ones, then disbanded ones.
    pub(crate) fn update_from_rcon(&self, observed: &[SquadInfo]) {
        let time = Utc::now();
        let mut changes: Vec<Event> = Vec::new();
        let mut added: Vec<Event> = Vec::new();
        let mut removed: Vec<Event> = Vec::new();
        {
            let mut inner = self.inner.lock().expect("squad map lock poisoned");
            let mut seen: Vec<SquadKey> = Vec::with_capacity(observed.len());

            for info in observed {
                let key = (info.team_id, info.squad_id);
                seen.push(key);
                inner
                    .team_names
                    .insert(info.team_name.clone(), info.team_id);
                let squad = Squad {
                    team_id: info.team_id,
                    squad_id: info.squad_id,
                    name: info.name.clone(),
                    size: info.size,
                    locked: info.locked,
                    creator_name: info.creator_name.clone(),
                    creator_eos_id: info.creator_eos_id.clone(),
                    creator_platform_id: info.creator_platform_id.clone(),
                };
                match inner.squads.get(&key) {
                    None => {
                        inner.index_creator(&squad);
                        inner.squads.insert(key, squad.clone());
                        added.push(Event::SquadAdded(SquadDeltaEvent { time, squad }));
                    }
                    Some(existing) if *existing != squad => {
                        let old = existing.clone();
                        inner.unindex_creator(&old);
                        inner.index_creator(&squad);
                        inner.squads.insert(key, squad.clone());
                        changes.push(Event::SquadUpdated(SquadUpdatedEvent {
                            time,
                            old,
                            new: squad,
                        }));
                    }
                    Some(_) => {}
                }
            }

            let absent: Vec<SquadKey> = inner
                .squads
                .keys()
                .filter(|key| !seen.contains(key))
                .copied()
                .collect();
            for key in absent {
                if let Some(squad) = inner.squads.remove(&key) {
                    inner.unindex_creator(&squad);
                    removed.push(Event::SquadDisbanded(SquadDeltaEvent { time, squad }));
                }
            }
        }
        for event in changes.into_iter().chain(added).chain(removed) {
            self.bus.emit(&event);
        }
    }

    /// Inserts a squad announced via a chat frame ahead of the next poll.
    /// Needs a team header seen before to resolve the team name; unknown
    /// names wait for the poll.
    pub(crate) fn note_chat_created(&self, event: &SquadCreatedEvent) {
        let created = {
            let mut inner = self.inner.lock().expect("squad map lock poisoned");
            let Some(team_id) = inner.team_names.get(&event.team_name).copied() else {
                tracing::debug!(team = %event.team_name, "Squad chat for an unknown team name.");
                return;
            };
            let key = (team_id, event.squad_id);
            if inner.squads.contains_key(&key) {
                return;
            }
            let squad = Squad {
                team_id,
                squad_id: event.squad_id,
                name: event.squad_name.clone(),
                size: 1,
                locked: false,
                creator_name: event.creator_name.clone(),
                creator_eos_id: event.creator_ids.eos.clone(),
                creator_platform_id: event.creator_ids.platform.clone(),
            };
            inner.index_creator(&squad);
            inner.squads.insert(key, squad.clone());
            squad
        };
        self.bus.emit(&Event::SquadAdded(SquadDeltaEvent {
            time: event.time,
            squad: created,
        }));
    }

    pub fn get(&self, team: TeamId, squad: SquadId) -> Option<Squad> {
        self.inner
            .lock()
            .expect("squad map lock poisoned")
            .squads
            .get(&(team, squad))
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("squad map lock poisoned").squads.len()
    }

    pub fn all(&self) -> Vec<Squad> {
        let mut squads: Vec<Squad> = self
            .inner
            .lock()
            .expect("squad map lock poisoned")
            .squads
            .values()
            .cloned()
            .collect();
        squads.sort_by_key(|squad| (squad.team_id, squad.squad_id));
        squads
    }

    pub fn by_team(&self, team: TeamId) -> Vec<Squad> {
        let mut squads: Vec<Squad> = self
            .inner
            .lock()
            .expect("squad map lock poisoned")
            .squads
            .values()
            .filter(|squad| squad.team_id == team)
            .cloned()
            .collect();
        squads.sort_by_key(|squad| squad.squad_id);
        squads
    }

    pub fn by_creator(&self, creator: &EosId) -> Vec<Squad> {
        let inner = self.inner.lock().expect("squad map lock poisoned");
        inner
            .by_creator
            .get(creator)
            .into_iter()
            .flatten()
            .filter_map(|key| inner.squads.get(key))
            .cloned()
            .collect()
    }
}

impl SquadMap {
    fn index_creator(&mut self, squad: &Squad) {
        if let Some(creator) = &squad.creator_eos_id {
            self.by_creator
                .entry(creator.clone())
                .or_default()
                .push(squad.key());
        }
    }

    fn unindex_creator(&mut self, squad: &Squad) {
        if let Some(creator) = &squad.creator_eos_id {
            if let Some(keys) = self.by_creator.get_mut(creator) {
                keys.retain(|key| *key != squad.key());
                if keys.is_empty() {
                    self.by_creator.remove(creator);
                }
            }
        }
    }
}
