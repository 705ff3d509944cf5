//! Short-lived correlation state between log lines. Owned exclusively by the
//! rule loop; nothing else ever touches it, which is what makes the lock-free
//! single-writer discipline work.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::events::RoundSide;
use crate::ids::{ControllerId, EosId, PlatformId};

/// Default cap of the player identity cache.
pub const IDENTITY_CACHE_CAP: usize = 1024;

/// The most recent damage record against one victim.
#[derive(Debug, Clone, PartialEq)]
pub struct LastDamage {
    pub time: DateTime<Utc>,
    pub damage: f32,
    pub weapon: String,
    pub attacker_name: String,
    pub attacker_eos: Option<EosId>,
    pub attacker_platform: Option<PlatformId>,
    pub attacker_controller: Option<ControllerId>,
}

/// The most recent wound record against one victim.
#[derive(Debug, Clone, PartialEq)]
pub struct LastWound {
    pub time: DateTime<Utc>,
    pub damage: f32,
    pub weapon: Option<String>,
    pub attacker_controller: Option<ControllerId>,
}

/// Correlation entry per victim name. Deleted when the victim dies or is
/// revived, so the map stays bounded by the number of active players.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VictimSession {
    pub last_damage: Option<LastDamage>,
    pub last_wound: Option<LastWound>,
}

/// The round-result accumulator, filled by the winner and tickets rules and
/// consumed when the round ends. A second winner determination before the
/// round ends means a draw: the winner slots are cleared but the layer stays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResult {
    pub determined_faction: Option<String>,
    pub winner: Option<RoundSide>,
    pub loser: Option<RoundSide>,
    pub layer: Option<String>,
}

/// What the control plane remembers about a player identity from log lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerIdentity {
    pub platform: Option<PlatformId>,
    pub name: Option<String>,
    pub controller: Option<ControllerId>,
}

/// The three correlation slots of the rule loop.
pub struct EventStore {
    sessions: HashMap<String, VictimSession>,
    round: RoundResult,
    identities: LruCache<EosId, PlayerIdentity>,
    controllers: HashMap<ControllerId, EosId>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_identity_cap(IDENTITY_CACHE_CAP)
    }

    pub fn with_identity_cap(cap: usize) -> Self {
        let cap = NonZeroUsize::new(cap.max(1)).expect("cap is at least one");
        Self {
            sessions: HashMap::new(),
            round: RoundResult::default(),
            identities: LruCache::new(cap),
            controllers: HashMap::new(),
        }
    }

    pub fn session(&self, victim: &str) -> Option<&VictimSession> {
        self.sessions.get(victim)
    }

    pub fn record_damage(&mut self, victim: &str, damage: LastDamage) {
        self.sessions.entry(victim.to_owned()).or_default().last_damage = Some(damage);
    }

    pub fn record_wound(&mut self, victim: &str, wound: LastWound) {
        self.sessions.entry(victim.to_owned()).or_default().last_wound = Some(wound);
    }

    /// Forgets a victim's correlation entry; called on death and revive.
    pub fn clear_session(&mut self, victim: &str) {
        self.sessions.remove(victim);
    }

    /// Wipes every victim entry; a fresh round starts with a clean slate.
    pub fn clear_sessions(&mut self) {
        self.sessions.clear();
    }

    pub fn round(&self) -> &RoundResult {
        &self.round
    }

    pub fn round_mut(&mut self) -> &mut RoundResult {
        &mut self.round
    }

    /// Hands out the accumulated round result and resets the slot.
    pub fn take_round(&mut self) -> RoundResult {
        std::mem::take(&mut self.round)
    }

    /// Merges identity facts for a player. `None` fields never erase known
    /// values; eviction from the cache also drops the controller index entry.
    pub fn remember_identity(
        &mut self,
        eos: &EosId,
        platform: Option<PlatformId>,
        name: Option<String>,
        controller: Option<ControllerId>,
    ) {
        let mut identity = self.identities.pop(eos).unwrap_or_default();
        if platform.is_some() {
            identity.platform = platform;
        }
        if name.is_some() {
            identity.name = name;
        }
        if let Some(controller) = controller {
            self.controllers.insert(controller.clone(), eos.clone());
            identity.controller = Some(controller);
        }
        if let Some((evicted_eos, evicted)) = self.identities.push(eos.clone(), identity) {
            if evicted_eos != *eos
                && let Some(controller) = evicted.controller
            {
                self.controllers.remove(&controller);
            }
        }
    }

    pub fn identity(&mut self, eos: &EosId) -> Option<&PlayerIdentity> {
        self.identities.get(eos)
    }

    /// Reverse lookup from a controller name to the cached identity.
    pub fn identity_by_controller(
        &mut self,
        controller: &ControllerId,
    ) -> Option<(EosId, PlayerIdentity)> {
        let eos = self.controllers.get(controller)?.clone();
        let identity = self.identities.get(&eos)?.clone();
        Some((eos, identity))
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RoundSide;
    use crate::ids::TeamId;

    fn eos(tag: u8) -> EosId {
        EosId::parse(&format!("{:032x}", tag)).unwrap()
    }

    #[test]
    fn sessions_are_cleared_per_victim() {
        let mut store = EventStore::new();
        store.record_damage(
            "Victim",
            LastDamage {
                time: Utc::now(),
                damage: 32.0,
                weapon: "BP_SVD".to_owned(),
                attacker_name: "Attacker".to_owned(),
                attacker_eos: None,
                attacker_platform: None,
                attacker_controller: None,
            },
        );
        assert!(store.session("Victim").is_some());
        store.clear_session("Victim");
        assert!(store.session("Victim").is_none());
    }

    #[test]
    fn round_take_resets_the_slot() {
        let mut store = EventStore::new();
        store.round_mut().winner = Some(RoundSide {
            team: TeamId::ONE,
            faction: "USA".to_owned(),
            subfaction: None,
            tickets: 150,
        });
        store.round_mut().layer = Some("Narva_RAAS_v1".to_owned());
        let taken = store.take_round();
        assert!(taken.winner.is_some());
        assert_eq!(store.round(), &RoundResult::default());
    }

    #[test]
    fn identity_cache_merges_and_evicts_with_controller_index() {
        let mut store = EventStore::with_identity_cap(2);
        let controller = ControllerId::parse("BP_PlayerController_C_1").unwrap();
        store.remember_identity(&eos(1), None, Some("One".to_owned()), Some(controller.clone()));
        store.remember_identity(
            &eos(1),
            Some(PlatformId::parse("76561198012345678").unwrap()),
            None,
            None,
        );
        let identity = store.identity(&eos(1)).unwrap();
        assert_eq!(identity.name.as_deref(), Some("One"));
        assert!(identity.platform.is_some());
        assert_eq!(
            store.identity_by_controller(&controller).unwrap().0,
            eos(1)
        );

        // Two more distinct players evict player one and its index entry.
        store.remember_identity(&eos(2), None, Some("Two".to_owned()), None);
        store.remember_identity(&eos(3), None, Some("Three".to_owned()), None);
        assert!(store.identity(&eos(1)).is_none());
        assert!(store.identity_by_controller(&controller).is_none());
    }
}
