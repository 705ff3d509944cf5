//! The push bridge: subscribes across the whole event bus and fans every
//! emission out to the connected WebSocket clients as JSON, keyed by topic. A
//! slow or dead client loses its own messages, never anyone else's.

use std::sync::Arc;

use server_core::events::{Event, EventKind};
use server_core::plugin::PluginContext;
use tokio::sync::broadcast;

/// Buffered emissions per bridge before slow receivers start lagging.
const PUSH_BUFFER: usize = 1024;

/// One serialized emission.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub topic: &'static str,
    pub json: Arc<String>,
}

/// The coarse channels a push client can filter on.
pub fn topic_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::PlayerConnected
        | EventKind::PlayerDisconnected
        | EventKind::JoinSucceeded
        | EventKind::PlayerPossess
        | EventKind::PlayerUnpossess
        | EventKind::PlayerAdded
        | EventKind::PlayerRemoved
        | EventKind::PlayerTeamChange
        | EventKind::PlayerSquadChange
        | EventKind::PlayerRoleChange
        | EventKind::PlayerLeaderChange => "players",
        EventKind::SquadAdded
        | EventKind::SquadUpdated
        | EventKind::SquadDisbanded
        | EventKind::SquadCreated => "squads",
        EventKind::ChatMessage => "chat",
        EventKind::PlayerDamaged
        | EventKind::PlayerWounded
        | EventKind::PlayerDied
        | EventKind::PlayerRevived
        | EventKind::DeployableDamaged => "kills",
        EventKind::NewGame
        | EventKind::RoundWinner
        | EventKind::RoundTickets
        | EventKind::RoundEnded
        | EventKind::LayerChanged => "game",
        EventKind::AdminBroadcast
        | EventKind::PossessedAdminCamera
        | EventKind::UnpossessedAdminCamera
        | EventKind::PlayerWarned
        | EventKind::PlayerKicked
        | EventKind::PlayerBanned => "admin",
        EventKind::TickRate => "metrics",
        EventKind::ServerStarting
        | EventKind::ServerReady
        | EventKind::ServerStopping
        | EventKind::ServerStopped
        | EventKind::ServerError => "server",
        EventKind::RconConnected | EventKind::RconDisconnected | EventKind::RconError => "rcon",
    }
}

/// Fan-out hub between the event bus and the WebSocket clients.
#[derive(Clone)]
pub struct PushBridge {
    sender: broadcast::Sender<PushMessage>,
}

impl PushBridge {
    /// Subscribes to every event kind on the given context. The context's
    /// subscriptions live as long as the process; the bridge is created once.
    pub fn new(context: &PluginContext) -> Self {
        let (sender, _) = broadcast::channel(PUSH_BUFFER);
        for kind in EventKind::ALL {
            let topic = topic_for(kind);
            let tx = sender.clone();
            let result = context.subscribe(kind, move |event| {
                match serialize(topic, event) {
                    Ok(json) => {
                        // No receivers is the idle dashboard case, not an error.
                        let _ = tx.send(PushMessage {
                            topic,
                            json: Arc::new(json),
                        });
                    }
                    Err(err) => {
                        tracing::error!(%err, kind = kind.as_str(), "Could not serialize event.");
                    }
                }
            });
            if let Err(err) = result {
                tracing::error!(%err, "Push bridge subscription failed.");
            }
        }
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.sender.subscribe()
    }
}

fn serialize(topic: &str, event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({
        "topic": topic,
        "kind": event.kind().as_str(),
        "event": event,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_topic() {
        // Exhaustive by construction; this pins a few expectations.
        assert_eq!(topic_for(EventKind::ChatMessage), "chat");
        assert_eq!(topic_for(EventKind::PlayerDied), "kills");
        assert_eq!(topic_for(EventKind::LayerChanged), "game");
        assert_eq!(topic_for(EventKind::RconDisconnected), "rcon");
        assert_eq!(topic_for(EventKind::PlayerTeamChange), "players");
    }
}
