use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Position of one named sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequenceCursor {
    pub step_index: usize,
    pub repeat_count_in_step: u32,
}

impl SequenceCursor {
    /// Serve the step under the cursor and move on.
    ///
    /// `repeats` holds each step's repeat threshold; 0 counts as 1. Returns
    /// the index of the served step. After `sum(repeats)` calls the cursor is
    /// back at its starting position.
    pub fn advance(&mut self, repeats: &[u32]) -> usize {
        if repeats.is_empty() {
            return 0;
        }
        let served = self.step_index % repeats.len();
        self.repeat_count_in_step += 1;
        if self.repeat_count_in_step >= repeats[served].max(1) {
            self.step_index = (served + 1) % repeats.len();
            self.repeat_count_in_step = 0;
        } else {
            self.step_index = served;
        }
        served
    }
}

/// Working memory and sequence cursors of one scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioState {
    pub data: Map<String, Value>,
    pub sequences: BTreeMap<String, SequenceCursor>,
}

impl ScenarioState {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            sequences: BTreeMap::new(),
        }
    }

    pub fn cursor(&self, sequence: &str) -> SequenceCursor {
        self.sequences.get(sequence).copied().unwrap_or_default()
    }

    /// Advance the named sequence, creating its cursor on first use
    pub fn advance_sequence(&mut self, sequence: &str, repeats: &[u32]) -> usize {
        self.sequences
            .entry(sequence.to_string())
            .or_default()
            .advance(repeats)
    }
}

#[derive(Debug, Default)]
struct Slot {
    initial: Map<String, Value>,
    defined: bool,
    state: ScenarioState,
}

impl Slot {
    fn reset(&mut self) {
        self.state = ScenarioState::new(self.initial.clone());
    }
}

/// Per-scenario state, each name guarded by its own lock.
///
/// The outer map lock is only held to find or create a slot, so unrelated
/// scenarios never wait on each other.
#[derive(Clone, Default)]
pub struct ScenarioStore {
    slots: Arc<RwLock<HashMap<String, Arc<Mutex<Slot>>>>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, name: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().await.get(name) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Snapshot of a scenario, created empty on first access
    pub async fn get_state(&self, name: &str) -> ScenarioState {
        let slot = self.slot(name).await;
        let guard = slot.lock().await;
        guard.state.clone()
    }

    /// Replace the state with `mutation(current)` and return the new snapshot
    pub async fn apply<F>(&self, name: &str, mutation: F) -> ScenarioState
    where
        F: FnOnce(&ScenarioState) -> ScenarioState,
    {
        let slot = self.slot(name).await;
        let mut guard = slot.lock().await;
        guard.state = mutation(&guard.state);
        guard.state.clone()
    }

    /// Run a fallible mutation on a working copy, committing only on success.
    ///
    /// Returns the committed snapshot alongside the mutation's output.
    pub async fn try_apply<T, E, F>(&self, name: &str, mutation: F) -> Result<(ScenarioState, T), E>
    where
        F: FnOnce(&mut ScenarioState) -> Result<T, E>,
    {
        let slot = self.slot(name).await;
        let mut guard = slot.lock().await;
        let mut working = guard.state.clone();
        let output = mutation(&mut working)?;
        guard.state = working.clone();
        Ok((working, output))
    }

    /// Set a scenario's initial working memory and reset it to that
    pub async fn define(&self, name: &str, initial: Map<String, Value>) {
        let slot = self.slot(name).await;
        let mut guard = slot.lock().await;
        guard.initial = initial;
        guard.defined = true;
        guard.reset();
        tracing::debug!(scenario = %name, "Defined scenario");
    }

    /// Like [`define`](Self::define), unless the scenario already has an initial state.
    /// Returns whether anything was recorded.
    pub async fn define_if_absent(&self, name: &str, initial: Map<String, Value>) -> bool {
        let slot = self.slot(name).await;
        let mut guard = slot.lock().await;
        if guard.defined {
            return false;
        }
        guard.initial = initial;
        guard.defined = true;
        guard.reset();
        true
    }

    /// Restore the initial working memory and rewind every sequence
    pub async fn reset(&self, name: &str) {
        let slot = self.slot(name).await;
        slot.lock().await.reset();
        tracing::info!(scenario = %name, "Reset scenario");
    }

    pub async fn reset_all(&self) {
        let slots: Vec<_> = self.slots.read().await.values().cloned().collect();
        for slot in slots {
            slot.lock().await.reset();
        }
        tracing::info!("Reset all scenarios");
    }

    /// Forget every scenario, including initial states
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
