//! The layer snapshot: current and next layer plus a bounded history of what
//! was played before, most recent first.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use crate::bus::EventBus;
use crate::events::{Event, LayerChangedEvent};
use crate::model::Layer;
use crate::rcon::parsers::MapInfo;

/// How many past layers are kept.
pub const DEFAULT_HISTORY_CAP: usize = 20;

struct LayerState {
    current: Option<Layer>,
    next: Option<Layer>,
    history: VecDeque<Layer>,
}

/// The layer service.
pub struct LayerService {
    bus: EventBus,
    history_cap: usize,
    inner: Mutex<LayerState>,
}

impl LayerService {
    pub fn new(bus: EventBus) -> Self {
        Self::with_history_cap(bus, DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(bus: EventBus, history_cap: usize) -> Self {
        Self {
            bus,
            history_cap: history_cap.max(1),
            inner: Mutex::new(LayerState {
                current: None,
                next: None,
                history: VecDeque::new(),
            }),
        }
    }

    /// Applies a `ShowCurrentMap` result. A change pushes the previous layer
    /// into the history and emits `LAYER_CHANGED`. Name parsing is
    /// best-effort and never fails the update.
    pub(crate) fn update_current(&self, info: &MapInfo) {
        let Some(layer_name) = &info.layer else {
            return;
        };
        let event = {
            let mut inner = self.inner.lock().expect("layer state lock poisoned");
            if inner
                .current
                .as_ref()
                .is_some_and(|current| current.name == *layer_name)
            {
                return;
            }
            let mut layer = Layer::from_name(layer_name);
            if let Some((one, two)) = &info.factions {
                layer.team1_faction = Some(one.clone());
                layer.team2_faction = Some(two.clone());
            }
            let previous = inner.current.replace(layer.clone());
            if let Some(previous_layer) = previous.clone() {
                inner.history.push_front(previous_layer);
                inner.history.truncate(self.history_cap);
            }
            Event::LayerChanged(LayerChangedEvent {
                time: Utc::now(),
                previous,
                current: layer,
            })
        };
        self.bus.emit(&event);
    }

    /// Applies a `ShowNextMap` result. An undecided vote clears the slot.
    pub(crate) fn update_next(&self, info: &MapInfo) {
        let mut inner = self.inner.lock().expect("layer state lock poisoned");
        inner.next = info.layer.as_ref().map(|name| {
            let mut layer = Layer::from_name(name);
            if let Some((one, two)) = &info.factions {
                layer.team1_faction = Some(one.clone());
                layer.team2_faction = Some(two.clone());
            }
            layer
        });
    }

    pub fn current(&self) -> Option<Layer> {
        self.inner
            .lock()
            .expect("layer state lock poisoned")
            .current
            .clone()
    }

    pub fn next(&self) -> Option<Layer> {
        self.inner
            .lock()
            .expect("layer state lock poisoned")
            .next
            .clone()
    }

    /// Past layers, most recent first.
    pub fn history(&self) -> Vec<Layer> {
        self.inner
            .lock()
            .expect("layer state lock poisoned")
            .history
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Arc;

    fn map(layer: &str) -> MapInfo {
        MapInfo {
            level: Some(layer.split('_').next().unwrap_or(layer).to_owned()),
            layer: Some(layer.to_owned()),
            factions: None,
        }
    }

    #[test]
    fn change_pushes_history_and_emits() {
        let bus = EventBus::new();
        let changes = Arc::new(Mutex::new(0usize));
        let changes_clone = changes.clone();
        bus.subscribe(EventKind::LayerChanged, move |_| {
            *changes_clone.lock().unwrap() += 1;
        })
        .unwrap();
        let service = LayerService::with_history_cap(bus, 2);

        service.update_current(&map("Narva_RAAS_v1"));
        assert_eq!(*changes.lock().unwrap(), 1);
        assert!(service.history().is_empty());

        // Same layer again: nothing.
        service.update_current(&map("Narva_RAAS_v1"));
        assert_eq!(*changes.lock().unwrap(), 1);

        service.update_current(&map("Gorodok_AAS_v2"));
        service.update_current(&map("Sumari_Seed_v1"));
        service.update_current(&map("Logar_RAAS_v1"));
        assert_eq!(*changes.lock().unwrap(), 4);
        // Cap two, most recent first.
        let history: Vec<String> = service.history().into_iter().map(|l| l.name).collect();
        assert_eq!(history, vec!["Sumari_Seed_v1", "Gorodok_AAS_v2"]);
    }

    #[test]
    fn next_layer_follows_the_vote() {
        let service = LayerService::new(EventBus::new());
        service.update_next(&map("Yehorivka_RAAS_v1"));
        assert_eq!(service.next().unwrap().name, "Yehorivka_RAAS_v1");
        service.update_next(&MapInfo {
            level: Some("Yehorivka".to_owned()),
            layer: None,
            factions: None,
        });
        assert!(service.next().is_none());
    }

    #[test]
    fn unparsable_layer_names_still_update() {
        let service = LayerService::new(EventBus::new());
        service.update_current(&map("JensensRange"));
        let current = service.current().unwrap();
        assert_eq!(current.name, "JensensRange");
        assert!(current.game_mode.is_none());
    }
}
