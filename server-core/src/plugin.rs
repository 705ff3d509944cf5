//! The facade handed to plugins and to the push bridge: the event bus with
//! explicit subscription handles, the command surface, read-only state views
//! and a scoped logger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bus::{EventBus, SubscriptionHandle};
use crate::error::{BusError, CommandError};
use crate::events::{Event, EventKind};
use crate::model::ServerInfo;
use crate::rcon::RconEngine;
use crate::state::{LayerService, PlayerService, SquadService};

/// The six verbosity levels, 0 (error) to 5 (trace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Error = 0,
    Warn = 1,
    Info = 2,
    Verbose = 3,
    Debug = 4,
    Trace = 5,
}

impl Verbosity {
    /// Clamps a configured numeric level onto the scale.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Verbosity::Error,
            1 => Verbosity::Warn,
            2 => Verbosity::Info,
            3 => Verbosity::Verbose,
            4 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

/// A logger bound to one component name with its own verbosity threshold.
#[derive(Clone)]
pub struct ScopedLogger {
    component: Arc<str>,
    level: Verbosity,
}

impl ScopedLogger {
    pub fn new(component: &str, level: Verbosity) -> Self {
        Self {
            component: Arc::from(component),
            level,
        }
    }

    pub fn level(&self) -> Verbosity {
        self.level
    }

    fn enabled(&self, level: Verbosity) -> bool {
        level <= self.level
    }

    pub fn error(&self, message: &str) {
        if self.enabled(Verbosity::Error) {
            tracing::error!(component = %self.component, "{message}");
        }
    }

    pub fn warn(&self, message: &str) {
        if self.enabled(Verbosity::Warn) {
            tracing::warn!(component = %self.component, "{message}");
        }
    }

    pub fn info(&self, message: &str) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(component = %self.component, "{message}");
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.enabled(Verbosity::Verbose) {
            tracing::debug!(component = %self.component, verbose = true, "{message}");
        }
    }

    pub fn debug(&self, message: &str) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!(component = %self.component, "{message}");
        }
    }

    pub fn trace(&self, message: &str) {
        if self.enabled(Verbosity::Trace) {
            tracing::trace!(component = %self.component, "{message}");
        }
    }
}

/// Everything a plugin may touch. Cloning is cheap; all views are shared.
#[derive(Clone)]
pub struct PluginContext {
    name: Arc<str>,
    bus: EventBus,
    engine: Arc<RconEngine>,
    players: Arc<PlayerService>,
    squads: Arc<SquadService>,
    layers: Arc<LayerService>,
    server_info: Arc<Mutex<ServerInfo>>,
    logger: ScopedLogger,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        bus: EventBus,
        engine: Arc<RconEngine>,
        players: Arc<PlayerService>,
        squads: Arc<SquadService>,
        layers: Arc<LayerService>,
        server_info: Arc<Mutex<ServerInfo>>,
        level: Verbosity,
    ) -> Self {
        Self {
            name: Arc::from(name),
            bus,
            engine,
            players,
            squads,
            layers,
            server_info,
            logger: ScopedLogger::new(name, level),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to one event kind. Keep the handle; dropping it does not
    /// end the subscription, passing it to [`Self::unsubscribe`] does.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    pub async fn wait_for(
        &self,
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> Result<Event, BusError> {
        self.bus.wait_for(kind, timeout).await
    }

    /// Raw command passthrough.
    pub async fn execute(&self, command: &str) -> Result<String, CommandError> {
        self.engine.execute(command).await
    }

    /// The typed command surface (warn, kick, broadcast, map control, ...).
    pub fn rcon(&self) -> &RconEngine {
        &self.engine
    }

    /// Read-only player view.
    pub fn players(&self) -> &PlayerService {
        &self.players
    }

    /// Read-only squad view.
    pub fn squads(&self) -> &SquadService {
        &self.squads
    }

    /// Read-only layer view.
    pub fn layers(&self) -> &LayerService {
        &self.layers
    }

    /// A copy of the current coarse server facts.
    pub fn server_info(&self) -> ServerInfo {
        self.server_info
            .lock()
            .expect("server info lock poisoned")
            .clone()
    }

    pub fn logger(&self) -> &ScopedLogger {
        &self.logger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels_map_and_order() {
        assert_eq!(Verbosity::from_level(0), Verbosity::Error);
        assert_eq!(Verbosity::from_level(3), Verbosity::Verbose);
        assert_eq!(Verbosity::from_level(9), Verbosity::Trace);
        assert!(Verbosity::Error < Verbosity::Trace);
    }

    #[test]
    fn scoped_logger_honours_its_threshold() {
        let logger = ScopedLogger::new("test-plugin", Verbosity::Warn);
        assert!(logger.enabled(Verbosity::Error));
        assert!(logger.enabled(Verbosity::Warn));
        assert!(!logger.enabled(Verbosity::Info));
        assert!(!logger.enabled(Verbosity::Trace));
    }
}
