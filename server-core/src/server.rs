//! The server controller: owns the RCON engine, the log pipeline, the state
//! services and the scheduler, and walks the lifecycle
//! `Created -> Starting -> Running -> Stopping -> Stopped`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::error::{BusError, StartError};
use crate::events::{Event, EventKind};
use crate::logs::LogReader;
use crate::logs::queue::LineQueue;
use crate::model::ServerInfo;
use crate::plugin::{PluginContext, Verbosity};
use crate::rcon::RconEngine;
use crate::rules::{RuleEngine, EngineStats, spawn_rule_loop};
use crate::scheduler::UpdateScheduler;
use crate::state::{LayerService, PlayerService, SquadService};

/// The controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// One managed game server.
pub struct ServerController {
    config: ServerConfig,
    bus: EventBus,
    engine: Arc<RconEngine>,
    players: Arc<PlayerService>,
    squads: Arc<SquadService>,
    layers: Arc<LayerService>,
    server_info: Arc<Mutex<ServerInfo>>,
    admins: Arc<Mutex<HashSet<String>>>,
    queue: Arc<LineQueue>,
    log_reader: LogReader,
    rule_engine: Arc<Mutex<RuleEngine>>,
    scheduler: UpdateScheduler,
    state_tx: watch::Sender<ServerState>,
    state_rx: watch::Receiver<ServerState>,
    rule_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ServerController {
    /// Builds the component tree and wires the internal subscriptions. No
    /// I/O happens until [`Self::start`].
    pub fn new(config: ServerConfig) -> Result<Self, StartError> {
        let bus = EventBus::new();
        let engine = RconEngine::new(config.rcon.clone(), bus.clone());
        let players = Arc::new(PlayerService::new(bus.clone()));
        let squads = Arc::new(SquadService::new(bus.clone()));
        let layers = Arc::new(LayerService::new(bus.clone()));
        let server_info = Arc::new(Mutex::new(ServerInfo::default()));
        let log_reader = LogReader::from_config(&config.log_reader)?;
        let queue = Arc::new(LineQueue::with_callbacks(
            config.log_reader.queue_capacity,
            crate::logs::queue::DEFAULT_HIGH_WATER,
            Some(Box::new(|depth| {
                tracing::warn!(depth, "Log queue is filling up.");
            })),
            Some(Box::new(|count| {
                tracing::warn!(count, "Log queue dropped its oldest lines.");
            })),
        ));

        wire_internal_subscriptions(&bus, &players, &squads, &server_info);

        let (state_tx, state_rx) = watch::channel(ServerState::Created);
        Ok(Self {
            config,
            bus,
            engine,
            players,
            squads,
            layers,
            server_info,
            admins: Arc::new(Mutex::new(HashSet::new())),
            queue,
            log_reader,
            rule_engine: Arc::new(Mutex::new(RuleEngine::new())),
            scheduler: UpdateScheduler::new(),
            state_tx,
            state_rx,
            rule_loop: Mutex::new(None),
        })
    }

    /// Connects RCON, starts the log source, the rule loop and the poll
    /// tasks. A failure leaves the controller in `Error` and is returned.
    pub async fn start(&self) -> Result<(), StartError> {
        if *self.state_rx.borrow() == ServerState::Running {
            return Ok(());
        }
        self.set_state(ServerState::Starting);
        self.bus
            .emit(&Event::lifecycle(EventKind::ServerStarting, None));

        if let Err(err) = self.engine.connect().await {
            self.fail_start(&err.to_string());
            return Err(err.into());
        }
        if let Err(err) = self.log_reader.watch(self.queue.clone()).await {
            self.engine.destroy().await;
            self.fail_start(&err.to_string());
            return Err(err.into());
        }

        {
            let mut loop_handle = self.rule_loop.lock().expect("rule loop lock poisoned");
            if loop_handle.is_none() {
                *loop_handle = Some(spawn_rule_loop(
                    self.rule_engine.clone(),
                    self.queue.clone(),
                    self.bus.clone(),
                ));
            }
        }
        if self.scheduler.task_names().is_empty() {
            self.register_default_tasks();
        }
        self.scheduler.start_all();

        self.set_state(ServerState::Running);
        self.bus.emit(&Event::lifecycle(EventKind::ServerReady, None));
        tracing::info!(server = %self.config.name, "Server controller running.");
        Ok(())
    }

    /// Tears everything down in reverse order. Idempotent.
    pub async fn stop(&self) {
        {
            let state = *self.state_rx.borrow();
            if matches!(state, ServerState::Stopped | ServerState::Created) {
                return;
            }
        }
        self.set_state(ServerState::Stopping);
        self.bus
            .emit(&Event::lifecycle(EventKind::ServerStopping, None));

        self.scheduler.stop_all();
        if let Some(handle) = self
            .rule_loop
            .lock()
            .expect("rule loop lock poisoned")
            .take()
        {
            handle.abort();
        }
        self.log_reader.unwatch().await;
        self.engine.destroy().await;

        self.set_state(ServerState::Stopped);
        self.bus
            .emit(&Event::lifecycle(EventKind::ServerStopped, None));
        tracing::info!(server = %self.config.name, "Server controller stopped.");
    }

    pub fn state(&self) -> ServerState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state_rx.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn rcon(&self) -> &Arc<RconEngine> {
        &self.engine
    }

    pub fn players(&self) -> &Arc<PlayerService> {
        &self.players
    }

    pub fn squads(&self) -> &Arc<SquadService> {
        &self.squads
    }

    pub fn layers(&self) -> &Arc<LayerService> {
        &self.layers
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn server_info(&self) -> ServerInfo {
        self.server_info
            .lock()
            .expect("server info lock poisoned")
            .clone()
    }

    /// The admin ids read from the configured list files.
    pub fn admins(&self) -> HashSet<String> {
        self.admins.lock().expect("admin set lock poisoned").clone()
    }

    /// A snapshot of the rule engine counters.
    pub fn rule_stats(&self) -> EngineStats {
        self.rule_engine
            .lock()
            .expect("rule engine lock poisoned")
            .stats()
            .clone()
    }

    /// Builds the facade a plugin (or the push bridge) works against.
    pub fn plugin_context(&self, name: &str) -> PluginContext {
        let level = self
            .config
            .verbosity
            .get(name)
            .copied()
            .map(Verbosity::from_level)
            .unwrap_or(Verbosity::Info);
        PluginContext::new(
            name,
            self.bus.clone(),
            self.engine.clone(),
            self.players.clone(),
            self.squads.clone(),
            self.layers.clone(),
            self.server_info.clone(),
            level,
        )
    }

    fn set_state(&self, state: ServerState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(?state, "Server state change.");
                *current = state;
                true
            }
        });
    }

    fn fail_start(&self, message: &str) {
        self.set_state(ServerState::Error);
        self.bus.emit(&Event::lifecycle(
            EventKind::ServerError,
            Some(message.to_owned()),
        ));
    }

    /// The default poll set: players, squads, layer info, server info every
    /// half minute, admin lists every five minutes.
    fn register_default_tasks(&self) {
        let intervals = &self.config.scheduler;

        let engine = self.engine.clone();
        let players = self.players.clone();
        self.scheduler.register(
            "playerList",
            Duration::from_millis(intervals.player_list_interval_ms),
            true,
            move || {
                let engine = engine.clone();
                let players = players.clone();
                Box::pin(async move {
                    let list = engine.list_players().await.map_err(|err| err.to_string())?;
                    players.update_from_rcon(&list);
                    Ok(())
                })
            },
        );

        let engine = self.engine.clone();
        let squads = self.squads.clone();
        self.scheduler.register(
            "squadList",
            Duration::from_millis(intervals.squad_list_interval_ms),
            true,
            move || {
                let engine = engine.clone();
                let squads = squads.clone();
                Box::pin(async move {
                    let list = engine.list_squads().await.map_err(|err| err.to_string())?;
                    squads.update_from_rcon(&list);
                    Ok(())
                })
            },
        );

        let engine = self.engine.clone();
        let layers = self.layers.clone();
        self.scheduler.register(
            "layerInfo",
            Duration::from_millis(intervals.layer_info_interval_ms),
            true,
            move || {
                let engine = engine.clone();
                let layers = layers.clone();
                Box::pin(async move {
                    let current = engine
                        .show_current_map()
                        .await
                        .map_err(|err| err.to_string())?;
                    layers.update_current(&current);
                    let next = engine.show_next_map().await.map_err(|err| err.to_string())?;
                    layers.update_next(&next);
                    Ok(())
                })
            },
        );

        let engine = self.engine.clone();
        let server_info = self.server_info.clone();
        self.scheduler.register(
            "serverInfo",
            Duration::from_millis(intervals.server_info_interval_ms),
            true,
            move || {
                let engine = engine.clone();
                let server_info = server_info.clone();
                Box::pin(async move {
                    let response = engine
                        .show_server_info()
                        .await
                        .map_err(|err| err.to_string())?;
                    let mut info = server_info.lock().expect("server info lock poisoned");
                    info.name = response.name;
                    info.max_players = response.max_players;
                    info.player_count = response.player_count;
                    info.public_queue = response.public_queue;
                    info.reserved_queue = response.reserved_queue;
                    info.updated_at = Some(chrono::Utc::now());
                    Ok(())
                })
            },
        );

        let sources = self.config.admin_lists.clone();
        let admins = self.admins.clone();
        self.scheduler.register(
            "adminList",
            Duration::from_millis(intervals.admin_list_interval_ms),
            true,
            move || {
                let sources = sources.clone();
                let admins = admins.clone();
                Box::pin(async move {
                    let mut collected = HashSet::new();
                    let mut failure = None;
                    for source in &sources {
                        match tokio::fs::read_to_string(source).await {
                            Ok(content) => collected.extend(parse_admin_ids(&content)),
                            Err(err) => failure = Some(format!("{source}: {err}")),
                        }
                    }
                    *admins.lock().expect("admin set lock poisoned") = collected;
                    match failure {
                        Some(message) => Err(message),
                        None => Ok(()),
                    }
                })
            },
        );
    }
}

/// The log-derived corrections the snapshot services take outside the RCON
/// polls: disconnect marks, controllers, name suffixes, chat-announced
/// squads and the observed tick rate.
fn wire_internal_subscriptions(
    bus: &EventBus,
    players: &Arc<PlayerService>,
    squads: &Arc<SquadService>,
    server_info: &Arc<Mutex<ServerInfo>>,
) {
    let subscriptions: Vec<Result<_, BusError>> = vec![
        {
            let players = players.clone();
            bus.subscribe(EventKind::PlayerDisconnected, move |event| {
                if let Event::PlayerDisconnected(payload) = event
                    && let Some(eos) = &payload.eos
                {
                    players.note_disconnect(eos);
                }
            })
        },
        {
            let players = players.clone();
            bus.subscribe(EventKind::PlayerConnected, move |event| {
                if let Event::PlayerConnected(payload) = event
                    && let Some(eos) = &payload.ids.eos
                {
                    players.note_controller(eos, &payload.controller);
                }
            })
        },
        {
            let players = players.clone();
            bus.subscribe(EventKind::PlayerPossess, move |event| {
                if let Event::PlayerPossess(payload) = event
                    && let Some(eos) = &payload.ids.eos
                {
                    players.note_name_suffix(eos, &payload.player_suffix);
                }
            })
        },
        {
            let squads = squads.clone();
            bus.subscribe(EventKind::SquadCreated, move |event| {
                if let Event::SquadCreated(payload) = event {
                    squads.note_chat_created(payload);
                }
            })
        },
        {
            let server_info = server_info.clone();
            bus.subscribe(EventKind::TickRate, move |event| {
                if let Event::TickRate(payload) = event {
                    let mut info = server_info.lock().expect("server info lock poisoned");
                    info.tick_rate = Some(payload.tick_rate);
                }
            })
        },
    ];
    for result in subscriptions {
        if let Err(err) = result {
            tracing::error!(%err, "Internal bus wiring failed.");
        }
    }
}

/// Pulls the admin ids out of an `Admins.cfg`-style file: `Admin=<id>:<group>`
/// lines, `//` comments stripped.
fn parse_admin_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.split("//").next().unwrap_or_default().trim();
            let rest = line.strip_prefix("Admin=")?;
            let id = rest.split(':').next()?.trim();
            if id.is_empty() {
                None
            } else {
                Some(id.to_owned())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_files_yield_ids_without_comments() {
        let content = "\
// Squad admin config\n\
Group=Admin:kick,ban,teamchange\n\
Admin=76561198012345678:Admin // head admin\n\
Admin=76561198087654321:Moderator\n\
Admin=:Broken\n\
random noise\n";
        let ids = parse_admin_ids(content);
        assert_eq!(ids, vec!["76561198012345678", "76561198087654321"]);
    }
}
