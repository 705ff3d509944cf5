//! The rule catalogue. Declaration order is matching order and is load
//! bearing: the damage rule must sit before its wound/death companions so the
//! correlation store already holds the attacker when their lines arrive.

use regex::Regex;

use crate::events::{
    AdminBroadcastEvent, Attacker, DeployableDamagedEvent, Event, JoinSucceededEvent, NewGameEvent,
    OnlineIds, PlayerConnectedEvent, PlayerDamagedEvent, PlayerDiedEvent, PlayerDisconnectedEvent,
    PlayerPossessEvent, PlayerRevivedEvent, PlayerUnpossessEvent, PlayerWoundedEvent,
    RoundEndedEvent, RoundSide, RoundTicketsEvent, RoundWinnerEvent, TickRateEvent,
};
use crate::events::EventKind;
use crate::ids::{ControllerId, TeamId};
use crate::rcon::parsers::parse_online_ids;
use crate::rules::Rule;
use crate::rules::patterns::{ParsedLine, ids_are_invalid, parse_damage, strip_class_suffix};
use crate::store::{EventStore, LastDamage, LastWound};

fn rule(name: &'static str, kind: EventKind, pattern: &str, parse: super::ParseFn) -> Rule {
    Rule {
        name,
        kind,
        pattern: Regex::new(pattern).expect("rule pattern"),
        parse,
    }
}

/// Builds the catalogue in its canonical order: connection, possession,
/// combat (damage, wound, died, revived), deployables, game flow, tick rate,
/// admin broadcast.
pub fn build_rules() -> Vec<Rule> {
    vec![
        rule(
            "player-connected",
            EventKind::PlayerConnected,
            r"^LogSquad: PostLogin: NewPlayer: BP_PlayerController_C .+PersistentLevel\.([A-Za-z0-9_]+) \(IP: ([0-9.]+) \| Online IDs:([^)]+)\)$",
            parse_player_connected,
        ),
        rule(
            "join-succeeded",
            EventKind::JoinSucceeded,
            r"^LogSquad: Join succeeded: (.+)$",
            parse_join_succeeded,
        ),
        rule(
            "player-disconnected",
            EventKind::PlayerDisconnected,
            r"^LogNet: UChannel::Close: .*RemoteAddr: ([0-9.]+):[0-9]+,.*UniqueId: RedpointEOS:([0-9a-f]+)",
            parse_player_disconnected,
        ),
        rule(
            "player-possess",
            EventKind::PlayerPossess,
            r"^LogSquadTrace: \[DedicatedServer\]ASQPlayerController::OnPossess\(\): PC=(.+?) \(Online IDs:([^)]+)\) Pawn=([A-Za-z0-9_]+)_C",
            parse_player_possess,
        ),
        rule(
            "player-unpossess",
            EventKind::PlayerUnpossess,
            r"^LogSquadTrace: \[DedicatedServer\]ASQPlayerController::OnUnPossess\(\): PC=(.+?) \(Online IDs:([^)]+)\)",
            parse_player_unpossess,
        ),
        rule(
            "player-damaged",
            EventKind::PlayerDamaged,
            r"^LogSquad: Player:(.+) ActualDamage=([0-9.-]+) from (.+?) \(Online IDs:([^|)]+)\| Player Controller ID: ([^ )]+)\) caused by (.+)$",
            parse_player_damaged,
        ),
        rule(
            "player-wounded",
            EventKind::PlayerWounded,
            r"^LogSquadTrace: \[DedicatedServer\]ASQSoldier::Wound\(\): Player:(.+) KillingDamage=([0-9.-]+) from ([A-Za-z0-9_]+) \(Online IDs:([^|)]+)\| Controller ID: ([^ )]+)\) caused by (.+)$",
            parse_player_wounded,
        ),
        rule(
            "player-died",
            EventKind::PlayerDied,
            // Some server builds log `Contoller ID`; both spellings occur.
            r"^LogSquadTrace: \[DedicatedServer\]ASQSoldier::Die\(\): Player:(.+) KillingDamage=([0-9.-]+) from ([A-Za-z0-9_]+) \(Online IDs:([^|)]+)\| Contr?oller ID: ([^ )]+)\) caused by (.+)$",
            parse_player_died,
        ),
        rule(
            "player-revived",
            EventKind::PlayerRevived,
            r"^LogSquad: (.+) \(Online IDs:([^)]+)\) has revived (.+) \(Online IDs:([^)]+)\)\.$",
            parse_player_revived,
        ),
        rule(
            "deployable-damaged",
            EventKind::DeployableDamaged,
            r"^LogSquadTrace: \[DedicatedServer\]ASQDeployable::TakeDamage\(\): ([A-Za-z0-9_]+)_C_[0-9]+: ([0-9.]+) damage attempt by causer ([A-Za-z0-9_]+)_C_[0-9]+ instigator (.+) with damage type ([A-Za-z0-9_]+)_C health remaining ([0-9.-]+)$",
            parse_deployable_damaged,
        ),
        rule(
            "round-winner",
            EventKind::RoundWinner,
            r"^LogSquadTrace: \[DedicatedServer\]ASQGameMode::DetermineMatchWinner\(\): (.+) won on (.+)$",
            parse_round_winner,
        ),
        rule(
            "round-tickets",
            EventKind::RoundTickets,
            r"^LogSquadGameEvents: Display: Team ([0-9]), (.+?) \( ?(.*?) ?\) has (won|lost) the match with ([0-9]+) Tickets on layer (.*) \(level (.+)\)!$",
            parse_round_tickets,
        ),
        rule(
            "round-ended",
            EventKind::RoundEnded,
            r"^LogGameState: Match State Changed from InProgress to WaitingPostMatch$",
            parse_round_ended,
        ),
        rule(
            "new-game",
            EventKind::NewGame,
            r"^LogWorld: Bringing World (\S+) up for play",
            parse_new_game,
        ),
        rule(
            "tick-rate",
            EventKind::TickRate,
            r"^LogSquad: USQGameState: Server Tick Rate: ([0-9.]+)$",
            parse_tick_rate,
        ),
        rule(
            "admin-broadcast",
            EventKind::AdminBroadcast,
            r"^LogSquad: ADMIN COMMAND: Message broadcasted <(.+)> from (.+)$",
            parse_admin_broadcast,
        ),
    ]
}

fn parse_player_connected(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[3]) {
        tracing::trace!(line = line.raw, "Connect line with INVALID ids.");
        return None;
    }
    let Ok(controller) = ControllerId::parse(&caps[1]) else {
        tracing::trace!(line = line.raw, "Connect line with a non-player controller.");
        return None;
    };
    let ids = parse_online_ids(&caps[3]);
    if let Some(eos) = &ids.eos {
        store.remember_identity(eos, ids.platform.clone(), None, Some(controller.clone()));
    }
    Some(Event::PlayerConnected(PlayerConnectedEvent {
        time: line.time,
        chain_id: line.chain_id,
        controller,
        ip: Some(caps[2].to_owned()),
        ids,
        raw: line.raw.to_owned(),
    }))
}

fn parse_join_succeeded(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    _store: &mut EventStore,
) -> Option<Event> {
    Some(Event::JoinSucceeded(JoinSucceededEvent {
        time: line.time,
        chain_id: line.chain_id,
        player_suffix: caps[1].to_owned(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_disconnected(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    _store: &mut EventStore,
) -> Option<Event> {
    Some(Event::PlayerDisconnected(PlayerDisconnectedEvent {
        time: line.time,
        chain_id: line.chain_id,
        ip: Some(caps[1].to_owned()),
        eos: crate::ids::EosId::parse(&caps[2]).ok(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_possess(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[2]) {
        tracing::trace!(line = line.raw, "Possess line with INVALID ids.");
        return None;
    }
    let ids = parse_online_ids(&caps[2]);
    let suffix = caps[1].to_owned();
    if let Some(eos) = &ids.eos {
        store.remember_identity(eos, ids.platform.clone(), Some(suffix.clone()), None);
    }
    Some(Event::PlayerPossess(PlayerPossessEvent {
        time: line.time,
        chain_id: line.chain_id,
        player_suffix: suffix,
        ids,
        pawn: caps[3].to_owned(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_unpossess(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[2]) {
        return None;
    }
    let ids = parse_online_ids(&caps[2]);
    let suffix = caps[1].to_owned();
    if let Some(eos) = &ids.eos {
        store.remember_identity(eos, ids.platform.clone(), Some(suffix.clone()), None);
    }
    Some(Event::PlayerUnpossess(PlayerUnpossessEvent {
        time: line.time,
        chain_id: line.chain_id,
        player_suffix: suffix,
        ids,
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_damaged(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[4]) {
        tracing::trace!(line = line.raw, "Damage line with INVALID ids.");
        return None;
    }
    let damage = parse_damage(&caps[2])?;
    let victim = caps[1].to_owned();
    let attacker_name = caps[3].to_owned();
    let ids = parse_online_ids(&caps[4]);
    let controller = ControllerId::parse(&caps[5]).ok();
    let weapon = strip_class_suffix(&caps[6]);

    store.record_damage(
        &victim,
        LastDamage {
            time: line.time,
            damage,
            weapon: weapon.clone(),
            attacker_name: attacker_name.clone(),
            attacker_eos: ids.eos.clone(),
            attacker_platform: ids.platform.clone(),
            attacker_controller: controller.clone(),
        },
    );
    if let Some(eos) = &ids.eos {
        store.remember_identity(
            eos,
            ids.platform.clone(),
            Some(attacker_name.clone()),
            controller.clone(),
        );
    }
    Some(Event::PlayerDamaged(PlayerDamagedEvent {
        time: line.time,
        chain_id: line.chain_id,
        victim_name: victim,
        damage,
        weapon,
        attacker: Attacker {
            name: Some(attacker_name),
            eos: ids.eos,
            platform: ids.platform,
            controller,
        },
        raw: line.raw.to_owned(),
    }))
}

/// Fills the attacker half from the line ids, then from the victim's damage
/// record, then from the identity cache keyed by controller.
fn enrich_attacker(
    store: &mut EventStore,
    victim: &str,
    ids: OnlineIds,
    controller: Option<ControllerId>,
) -> Attacker {
    let mut attacker = Attacker {
        name: None,
        eos: ids.eos,
        platform: ids.platform,
        controller,
    };
    if let Some(session) = store.session(victim)
        && let Some(damage) = session.last_damage.clone()
    {
        attacker.name = Some(damage.attacker_name);
        if attacker.eos.is_none() {
            attacker.eos = damage.attacker_eos;
        }
        if attacker.platform.is_none() {
            attacker.platform = damage.attacker_platform;
        }
        if attacker.controller.is_none() {
            attacker.controller = damage.attacker_controller;
        }
    }
    if attacker.name.is_none()
        && let Some(controller) = attacker.controller.clone()
        && let Some((eos, identity)) = store.identity_by_controller(&controller)
    {
        attacker.name = identity.name;
        if attacker.eos.is_none() {
            attacker.eos = Some(eos);
        }
        if attacker.platform.is_none() {
            attacker.platform = identity.platform;
        }
    }
    attacker
}

fn parse_player_wounded(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[4]) {
        tracing::trace!(line = line.raw, "Wound line with INVALID ids.");
        return None;
    }
    let damage = parse_damage(&caps[2])?;
    let victim = caps[1].to_owned();
    let ids = parse_online_ids(&caps[4]);
    let controller = ControllerId::parse(&caps[5]).ok();
    let weapon = Some(strip_class_suffix(&caps[6]));

    let attacker = enrich_attacker(store, &victim, ids, controller.clone());
    store.record_wound(
        &victim,
        LastWound {
            time: line.time,
            damage,
            weapon: weapon.clone(),
            attacker_controller: controller,
        },
    );
    Some(Event::PlayerWounded(PlayerWoundedEvent {
        time: line.time,
        chain_id: line.chain_id,
        victim_name: victim,
        damage,
        weapon,
        attacker,
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_died(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[4]) {
        tracing::trace!(line = line.raw, "Death line with INVALID ids.");
        return None;
    }
    let damage = parse_damage(&caps[2])?;
    let victim = caps[1].to_owned();
    let ids = parse_online_ids(&caps[4]);
    let controller = ControllerId::parse(&caps[5]).ok();
    let weapon = Some(strip_class_suffix(&caps[6]));

    let attacker = enrich_attacker(store, &victim, ids, controller);
    // The chain for this victim is complete once the death goes out.
    store.clear_session(&victim);
    Some(Event::PlayerDied(PlayerDiedEvent {
        time: line.time,
        chain_id: line.chain_id,
        victim_name: victim,
        damage,
        weapon,
        attacker,
        raw: line.raw.to_owned(),
    }))
}

fn parse_player_revived(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    if ids_are_invalid(&caps[2]) || ids_are_invalid(&caps[4]) {
        return None;
    }
    let reviver_name = caps[1].to_owned();
    let reviver_ids = parse_online_ids(&caps[2]);
    let victim_name = caps[3].to_owned();
    let victim_ids = parse_online_ids(&caps[4]);
    if let Some(eos) = &reviver_ids.eos {
        store.remember_identity(eos, reviver_ids.platform.clone(), Some(reviver_name.clone()), None);
    }
    if let Some(eos) = &victim_ids.eos {
        store.remember_identity(eos, victim_ids.platform.clone(), Some(victim_name.clone()), None);
    }
    // A revive closes the victim's damage chain just like a death.
    store.clear_session(&victim_name);
    Some(Event::PlayerRevived(PlayerRevivedEvent {
        time: line.time,
        chain_id: line.chain_id,
        reviver_name,
        reviver_ids,
        victim_name,
        victim_ids,
        raw: line.raw.to_owned(),
    }))
}

fn parse_deployable_damaged(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    _store: &mut EventStore,
) -> Option<Event> {
    let damage = parse_damage(&caps[2])?;
    Some(Event::DeployableDamaged(DeployableDamagedEvent {
        time: line.time,
        chain_id: line.chain_id,
        deployable: caps[1].to_owned(),
        damage,
        weapon: caps[3].to_owned(),
        attacker_name: caps[4].to_owned(),
        health_remaining: caps[6].parse().ok(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_round_winner(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    let faction = caps[1].to_owned();
    let layer = caps[2].to_owned();
    let round = store.round_mut();
    if round.determined_faction.is_some() || round.winner.is_some() {
        // A second winner determination before the round ended: a draw.
        // The layer is kept, the winner slots are not.
        round.determined_faction = None;
        round.winner = None;
    } else {
        round.determined_faction = Some(faction.clone());
    }
    round.layer = Some(layer.clone());
    Some(Event::RoundWinner(RoundWinnerEvent {
        time: line.time,
        chain_id: line.chain_id,
        faction,
        layer,
        raw: line.raw.to_owned(),
    }))
}

fn parse_round_tickets(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    let team = caps[1]
        .parse::<i64>()
        .ok()
        .and_then(|v| TeamId::new(v).ok())?;
    let subfaction = match caps[3].trim() {
        "" => None,
        subfaction => Some(subfaction.to_owned()),
    };
    let side = RoundSide {
        team,
        faction: caps[2].to_owned(),
        subfaction,
        tickets: caps[5].parse().ok()?,
    };
    let won = &caps[4] == "won";
    let layer = caps[6].to_owned();
    let round = store.round_mut();
    if won {
        round.winner = Some(side.clone());
    } else {
        round.loser = Some(side.clone());
    }
    round.layer = Some(layer.clone());
    Some(Event::RoundTickets(RoundTicketsEvent {
        time: line.time,
        chain_id: line.chain_id,
        side,
        won,
        layer,
        level: caps[7].to_owned(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_round_ended(
    line: &ParsedLine<'_>,
    _caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    let round = store.take_round();
    Some(Event::RoundEnded(RoundEndedEvent {
        time: line.time,
        chain_id: line.chain_id,
        winner: round.winner,
        loser: round.loser,
        layer: round.layer,
        raw: line.raw.to_owned(),
    }))
}

fn parse_new_game(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    store: &mut EventStore,
) -> Option<Event> {
    // Whatever chains were open belong to the previous round.
    store.clear_sessions();
    Some(Event::NewGame(NewGameEvent {
        time: line.time,
        chain_id: line.chain_id,
        map_classname: caps[1].to_owned(),
        raw: line.raw.to_owned(),
    }))
}

fn parse_tick_rate(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    _store: &mut EventStore,
) -> Option<Event> {
    Some(Event::TickRate(TickRateEvent {
        time: line.time,
        chain_id: line.chain_id,
        tick_rate: caps[1].parse().ok()?,
        raw: line.raw.to_owned(),
    }))
}

fn parse_admin_broadcast(
    line: &ParsedLine<'_>,
    caps: &regex::Captures<'_>,
    _store: &mut EventStore,
) -> Option<Event> {
    let from = match caps[2].trim() {
        "" => None,
        from => Some(from.to_owned()),
    };
    Some(Event::AdminBroadcast(AdminBroadcastEvent {
        time: line.time,
        chain_id: line.chain_id,
        message: caps[1].to_owned(),
        from,
        raw: line.raw.to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleEngine;
    use crate::rules::patterns::split_prefix;

    const EOS_A: &str = "0002a10186d9414496bf20d22d3860ba";
    const EOS_B: &str = "0002a10186d9414496bf20d22d3860bb";
    const STEAM_A: &str = "76561198012345678";

    fn prefixed(chain: u64, tail: &str) -> String {
        format!("[2023.11.25-13.12.31:512][{chain:>5}]{tail}")
    }

    fn damage_line(chain: u64) -> String {
        prefixed(chain, &format!(
            "LogSquad: Player:Victim ActualDamage=32.00 from Attacker (Online IDs: EOS: {EOS_A} steam: {STEAM_A} | Player Controller ID: BP_PlayerController_C_2146085496) caused by BP_SVD_C_2130826410"
        ))
    }

    fn wound_line(chain: u64) -> String {
        prefixed(chain, &format!(
            "LogSquadTrace: [DedicatedServer]ASQSoldier::Wound(): Player:Victim KillingDamage=-199.0 from BP_PlayerController_C_2146085496 (Online IDs: EOS: {EOS_A} steam: {STEAM_A} | Controller ID: BP_PlayerController_C_2146085496) caused by BP_SVD_C_2130826410"
        ))
    }

    fn died_line(chain: u64) -> String {
        prefixed(chain, &format!(
            "LogSquadTrace: [DedicatedServer]ASQSoldier::Die(): Player:Victim KillingDamage=199.0 from BP_PlayerController_C_2146085496 (Online IDs: EOS: {EOS_A} steam: {STEAM_A} | Contoller ID: BP_PlayerController_C_2146085496) caused by BP_SVD_C_2130826410"
        ))
    }

    #[test]
    fn every_sample_line_matches_exactly_one_rule() {
        let samples = vec![
            prefixed(1, &format!("LogSquad: PostLogin: NewPlayer: BP_PlayerController_C /Game/Maps/Narva.Narva:PersistentLevel.BP_PlayerController_C_2146085496 (IP: 92.106.1.12 | Online IDs: EOS: {EOS_A} steam: {STEAM_A})")),
            prefixed(2, "LogSquad: Join succeeded: Yuri"),
            prefixed(3, &format!("LogNet: UChannel::Close: Sending CloseBunch. ChIndex == 0. Name: [UChannel] ChIndex: 0, Closing: 0 [UNetConnection] RemoteAddr: 92.106.1.12:60419, Name: EOSIpNetConnection_2146085496, Driver: GameNetDriver EOSNetDriver_2146085496, IsServer: YES, PC: BP_PlayerController_C_2146085496, Owner: BP_PlayerController_C_2146085496, UniqueId: RedpointEOS:{EOS_A}")),
            prefixed(4, &format!("LogSquadTrace: [DedicatedServer]ASQPlayerController::OnPossess(): PC=Yuri (Online IDs: EOS: {EOS_A} steam: {STEAM_A}) Pawn=BP_Soldier_USA_Rifleman01_C_2146085496 FullPath=BP_Soldier_USA_Rifleman01_C /Game/Maps/Narva")),
            prefixed(5, &format!("LogSquadTrace: [DedicatedServer]ASQPlayerController::OnUnPossess(): PC=Yuri (Online IDs: EOS: {EOS_A} steam: {STEAM_A})")),
            damage_line(6),
            wound_line(7),
            died_line(8),
            prefixed(9, &format!("LogSquad: Reviver (Online IDs: EOS: {EOS_B} steam: {STEAM_A}) has revived Victim (Online IDs: EOS: {EOS_A} steam: {STEAM_A}).")),
            prefixed(10, "LogSquadTrace: [DedicatedServer]ASQDeployable::TakeDamage(): BP_FOBRadio_Woodland_C_2146085496: 350.00 damage attempt by causer BP_Projectile_40mm_HE_C_2130826410 instigator Attacker with damage type BP_Fragment_DamageType_C health remaining 214.57"),
            prefixed(11, "LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): US Army won on Narva_RAAS_v1"),
            prefixed(12, "LogSquadGameEvents: Display: Team 1, US Army ( 1st Cavalry Regiment ) has won the match with 150 Tickets on layer Narva_RAAS_v1 (level Narva)!"),
            prefixed(13, "LogGameState: Match State Changed from InProgress to WaitingPostMatch"),
            prefixed(14, "LogWorld: Bringing World /Game/Maps/Narva/Narva_RAAS_v1.Narva_RAAS_v1 up for play (max tick rate 50) at 2023.11.25-13.12.31"),
            prefixed(15, "LogSquad: USQGameState: Server Tick Rate: 39.52"),
            prefixed(16, "LogSquad: ADMIN COMMAND: Message broadcasted <Server restart in 5> from RCON"),
        ];
        let rules = build_rules();
        for line in &samples {
            let parsed = split_prefix(line).unwrap_or_else(|| panic!("no prefix: {line}"));
            let matches: Vec<&str> = rules
                .iter()
                .filter(|rule| rule.pattern.is_match(parsed.rest))
                .map(|rule| rule.name)
                .collect();
            assert_eq!(matches.len(), 1, "line matched {matches:?}: {line}");
        }
    }

    #[test]
    fn damage_wound_death_chain_enriches_and_clears() {
        let mut engine = RuleEngine::new();

        let damaged = engine.process_line(&damage_line(42)).unwrap();
        match &damaged {
            Event::PlayerDamaged(event) => {
                assert_eq!(event.chain_id.value(), 42);
                assert_eq!(event.victim_name, "Victim");
                assert_eq!(event.weapon, "BP_SVD");
                assert_eq!(event.attacker.name.as_deref(), Some("Attacker"));
            }
            other => panic!("wrong event {other:?}"),
        }

        let wounded = engine.process_line(&wound_line(42)).unwrap();
        match &wounded {
            Event::PlayerWounded(event) => {
                assert_eq!(event.chain_id.value(), 42);
                assert_eq!(event.damage, 199.0);
                // Enriched from the damage record: the line itself only
                // carries the controller.
                assert_eq!(event.attacker.name.as_deref(), Some("Attacker"));
                assert_eq!(event.attacker.eos.as_ref().unwrap().as_str(), EOS_A);
            }
            other => panic!("wrong event {other:?}"),
        }

        let died = engine.process_line(&died_line(42)).unwrap();
        match &died {
            Event::PlayerDied(event) => {
                assert_eq!(event.chain_id.value(), 42);
                assert_eq!(event.attacker.name.as_deref(), Some("Attacker"));
            }
            other => panic!("wrong event {other:?}"),
        }
        assert_eq!(engine.store().session_count(), 0, "victim entry must clear");
    }

    #[test]
    fn revive_clears_the_victim_session() {
        let mut engine = RuleEngine::new();
        engine.process_line(&damage_line(1));
        assert_eq!(engine.store().session_count(), 1);
        engine
            .process_line(&prefixed(2, &format!(
                "LogSquad: Reviver (Online IDs: EOS: {EOS_B} steam: {STEAM_A}) has revived Victim (Online IDs: EOS: {EOS_A} steam: {STEAM_A})."
            )))
            .unwrap();
        assert_eq!(engine.store().session_count(), 0);
    }

    #[test]
    fn round_flow_accumulates_and_clears() {
        let mut engine = RuleEngine::new();
        engine.process_line(&prefixed(
            1,
            "LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): US Army won on Narva_RAAS_v1",
        ));
        engine.process_line(&prefixed(
            2,
            "LogSquadGameEvents: Display: Team 1, US Army ( 1st Cavalry Regiment ) has won the match with 150 Tickets on layer Narva_RAAS_v1 (level Narva)!",
        ));
        engine.process_line(&prefixed(
            3,
            "LogSquadGameEvents: Display: Team 2, Russian Ground Forces ( 49th Combined Arms Army ) has lost the match with 0 Tickets on layer Narva_RAAS_v1 (level Narva)!",
        ));
        let ended = engine
            .process_line(&prefixed(
                4,
                "LogGameState: Match State Changed from InProgress to WaitingPostMatch",
            ))
            .unwrap();
        match ended {
            Event::RoundEnded(event) => {
                let winner = event.winner.unwrap();
                assert_eq!(winner.team, TeamId::ONE);
                assert_eq!(winner.tickets, 150);
                assert_eq!(
                    winner.subfaction.as_deref(),
                    Some("1st Cavalry Regiment")
                );
                assert_eq!(event.loser.unwrap().tickets, 0);
                assert_eq!(event.layer.as_deref(), Some("Narva_RAAS_v1"));
            }
            other => panic!("wrong event {other:?}"),
        }
        // The accumulator was consumed: a second round end is empty.
        let again = engine
            .process_line(&prefixed(
                5,
                "LogGameState: Match State Changed from InProgress to WaitingPostMatch",
            ))
            .unwrap();
        match again {
            Event::RoundEnded(event) => {
                assert!(event.winner.is_none());
                assert!(event.layer.is_none());
            }
            other => panic!("wrong event {other:?}"),
        }
    }

    #[test]
    fn double_winner_before_round_end_is_a_draw_keeping_the_layer() {
        let mut engine = RuleEngine::new();
        engine.process_line(&prefixed(
            1,
            "LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): US Army won on Narva_RAAS_v1",
        ));
        engine.process_line(&prefixed(
            2,
            "LogSquadTrace: [DedicatedServer]ASQGameMode::DetermineMatchWinner(): Russian Ground Forces won on Narva_RAAS_v1",
        ));
        let ended = engine
            .process_line(&prefixed(
                3,
                "LogGameState: Match State Changed from InProgress to WaitingPostMatch",
            ))
            .unwrap();
        match ended {
            Event::RoundEnded(event) => {
                assert!(event.winner.is_none(), "a draw has no winner");
                assert_eq!(event.layer.as_deref(), Some("Narva_RAAS_v1"));
            }
            other => panic!("wrong event {other:?}"),
        }
    }

    #[test]
    fn invalid_ids_suppress_emission_but_count_as_matched() {
        let mut engine = RuleEngine::new();
        let line = prefixed(
            1,
            "LogSquad: Player:Victim ActualDamage=32.00 from Bot (Online IDs: INVALID | Player Controller ID: BP_PlayerController_C_1) caused by BP_SVD_C_2",
        );
        assert!(engine.process_line(&line).is_none());
        assert_eq!(engine.stats().lines_matched, 1);
    }

    #[test]
    fn unmatched_lines_are_sampled() {
        let mut engine = RuleEngine::new();
        for i in 0..10 {
            engine.process_line(&prefixed(i, "LogEOS: Verbose: something irrelevant"));
        }
        assert_eq!(engine.stats().lines_unmatched, 10);
        assert_eq!(engine.stats().unmatched_samples.len(), 5);
    }
}
