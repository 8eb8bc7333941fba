//! Politeness policies: which gate governs a task

use crate::politeness::gate::{IntervalGate, OpenGate, TimeGate};
use crate::task::ProcessingTask;
use crate::url::{politeness_key, KeyMode};
use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides when a task may be dispatched
pub trait PolitenessPolicy: Send + Sync {
    /// Reserves a dispatch slot for `task` and returns its start
    fn eligible_at(&self, task: &ProcessingTask, now: Instant) -> Instant;

    /// Rate-limiting key of a task, used for logging
    fn key_label(&self, task: &ProcessingTask) -> String;
}

type KeyResolver<K> = Box<dyn Fn(&ProcessingTask) -> K + Send + Sync>;
type GateFactory<K> = Box<dyn Fn(&K) -> Arc<dyn TimeGate> + Send + Sync>;

/// Policy with one lazily created gate per key
///
/// Gates are created on first use and never replaced, so every
/// reservation for a key goes through the same gate instance. Keys do not
/// share any state: congestion on one key never delays another.
pub struct KeyedPolitenessPolicy<K> {
    resolver: KeyResolver<K>,
    factory: GateFactory<K>,
    gates: DashMap<K, Arc<dyn TimeGate>>,
}

impl<K> KeyedPolitenessPolicy<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    pub fn new<R, F>(resolver: R, factory: F) -> Self
    where
        R: Fn(&ProcessingTask) -> K + Send + Sync + 'static,
        F: Fn(&K) -> Arc<dyn TimeGate> + Send + Sync + 'static,
    {
        Self {
            resolver: Box::new(resolver),
            factory: Box::new(factory),
            gates: DashMap::new(),
        }
    }

    /// Returns the gate for `key`, creating it if absent
    pub fn gate(&self, key: &K) -> Arc<dyn TimeGate> {
        if let Some(gate) = self.gates.get(key) {
            return Arc::clone(gate.value());
        }
        // The entry holds the shard lock, so racing callers observe one gate.
        let entry = self
            .gates
            .entry(key.clone())
            .or_insert_with(|| (self.factory)(key));
        Arc::clone(entry.value())
    }

    /// Number of keys that have a gate
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

impl KeyedPolitenessPolicy<String> {
    /// One [`IntervalGate`] per host (or origin), all with the same interval
    pub fn per_key(interval: Duration, mode: KeyMode) -> Self {
        Self::new(
            move |task: &ProcessingTask| politeness_key(&task.url, mode),
            move |_key: &String| -> Arc<dyn TimeGate> { Arc::new(IntervalGate::new(interval)) },
        )
    }
}

impl<K> PolitenessPolicy for KeyedPolitenessPolicy<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    fn eligible_at(&self, task: &ProcessingTask, now: Instant) -> Instant {
        let key = (self.resolver)(task);
        let allowed = self.gate(&key).eligible_at(now);
        tracing::trace!(
            key = %key,
            task_id = %task.id,
            wait_ms = allowed.saturating_duration_since(now).as_millis() as u64,
            "Reserved dispatch slot"
        );
        allowed
    }

    fn key_label(&self, task: &ProcessingTask) -> String {
        (self.resolver)(task).to_string()
    }
}

/// Policy that never delays anything
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl PolitenessPolicy for Unrestricted {
    fn eligible_at(&self, _task: &ProcessingTask, now: Instant) -> Instant {
        OpenGate.eligible_at(now)
    }

    fn key_label(&self, _task: &ProcessingTask) -> String {
        "*".to_string()
    }
}
