//! The rule engine: an ordered catalogue of `pattern -> parse` rules over the
//! log line stream. Rules are tried in declaration order and the first match
//! wins; a matching rule may write correlation state, emit a typed event, or
//! both.

pub mod catalog;
pub mod patterns;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::events::{Event, EventKind};
use crate::logs::queue::LineQueue;
use crate::rules::patterns::{ParsedLine, split_prefix};
use crate::store::EventStore;

/// How many lines one engine pass takes off the queue.
pub const BATCH_SIZE: usize = 100;
/// The fixed cadence of the engine loop.
pub const CADENCE: Duration = Duration::from_millis(10);
/// How many unmatched line prefixes the stats keep for diagnostics.
const UNMATCHED_SAMPLE_CAP: usize = 5;

/// The parse half of a rule: turn the captures into correlation writes
/// and/or a typed event.
pub type ParseFn = fn(&ParsedLine<'_>, &regex::Captures<'_>, &mut EventStore) -> Option<Event>;

/// One classification rule. The pattern applies to the line tail after the
/// common `[timestamp][chain id]` prefix.
pub struct Rule {
    pub name: &'static str,
    pub kind: EventKind,
    pub pattern: Regex,
    pub parse: ParseFn,
}

/// Counters one engine keeps across its lifetime.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub lines_processed: u64,
    pub lines_matched: u64,
    pub lines_unmatched: u64,
    /// Up to five truncated unmatched tails, first come first kept.
    pub unmatched_samples: Vec<String>,
    pub lines_dropped: u64,
    pub per_kind: HashMap<&'static str, u64>,
    /// Rolling average of the match-and-parse time.
    pub avg_match_latency_us: f64,
    pub peak_queue_depth: usize,
}

/// The engine itself: rules, the correlation store and the stats. Owned by
/// the rule loop task; other readers get snapshots of the stats.
pub struct RuleEngine {
    rules: Vec<Rule>,
    store: EventStore,
    stats: EngineStats,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: catalog::build_rules(),
            store: EventStore::new(),
            stats: EngineStats::default(),
        }
    }

    /// Classifies one line. Returns the event to publish, if the matching
    /// rule produced one.
    pub fn process_line(&mut self, line: &str) -> Option<Event> {
        self.stats.lines_processed += 1;
        let started = Instant::now();
        let Some(parsed) = split_prefix(line) else {
            self.note_unmatched(line);
            return None;
        };
        let mut matched = None;
        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(parsed.rest) {
                matched = Some((rule.name, rule.parse, caps));
                break;
            }
        }
        let Some((name, parse, caps)) = matched else {
            self.note_unmatched(parsed.rest);
            return None;
        };
        self.stats.lines_matched += 1;
        *self.stats.per_kind.entry(name).or_insert(0) += 1;
        let event = parse(&parsed, &caps, &mut self.store);
        self.note_latency(started.elapsed());
        event
    }

    /// Folds queue-side observations into the stats.
    pub fn note_queue(&mut self, dropped_total: u64, peak_depth: usize) {
        self.stats.lines_dropped = dropped_total;
        self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(peak_depth);
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &EventStore {
        &self.store
    }

    fn note_unmatched(&mut self, tail: &str) {
        self.stats.lines_unmatched += 1;
        if self.stats.unmatched_samples.len() < UNMATCHED_SAMPLE_CAP {
            let sample: String = tail.chars().take(80).collect();
            self.stats.unmatched_samples.push(sample);
        }
    }

    fn note_latency(&mut self, elapsed: Duration) {
        let sample = elapsed.as_micros() as f64;
        let n = self.stats.lines_matched as f64;
        self.stats.avg_match_latency_us += (sample - self.stats.avg_match_latency_us) / n.max(1.0);
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the rule loop: a fixed-cadence batch drain of the line queue. The
/// loop is the sole owner of the correlation store; publishing happens after
/// each batch, in file order.
pub fn spawn_rule_loop(
    engine: Arc<std::sync::Mutex<RuleEngine>>,
    queue: Arc<LineQueue>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CADENCE);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let lines = queue.dequeue_many(BATCH_SIZE);
            if lines.is_empty() {
                continue;
            }
            let events: Vec<Event> = {
                let mut engine = engine.lock().expect("rule engine lock poisoned");
                engine.note_queue(queue.dropped_total(), queue.peak_depth());
                lines
                    .iter()
                    .filter_map(|line| engine.process_line(line))
                    .collect()
            };
            for event in &events {
                bus.emit(event);
            }
        }
    })
}
