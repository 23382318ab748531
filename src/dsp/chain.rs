//! Stage Chain management
//!
//! Stages are executed in chain order (index 0 first), once per block, by a
//! single processing thread. Control threads reach the same stages through a
//! [`ChainControl`] handle and change parameters while the chain runs; each
//! stage serializes those changes against its own execute.

use super::Stage;
use crate::engine::BufferPool;
use crate::error::{Result, StageError};
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One chain slot
#[derive(Clone)]
struct ChainEntry {
    id: String,
    stage: Arc<dyn Stage>,
}

type Entries = Arc<RwLock<Vec<ChainEntry>>>;

fn read(entries: &Entries) -> RwLockReadGuard<'_, Vec<ChainEntry>> {
    entries.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(entries: &Entries) -> RwLockWriteGuard<'_, Vec<ChainEntry>> {
    entries.write().unwrap_or_else(PoisonError::into_inner)
}

fn position(entries: &[ChainEntry], stage_id: &str) -> Result<usize> {
    entries
        .iter()
        .position(|e| e.id == stage_id)
        .ok_or_else(|| StageError::StageNotFound {
            stage_id: stage_id.to_string(),
        })
}

fn find(entries: &Entries, stage_id: &str) -> Option<Arc<dyn Stage>> {
    read(entries)
        .iter()
        .find(|e| e.id == stage_id)
        .map(|e| e.stage.clone())
}

fn describe(entries: &Entries) -> Value {
    let stages: Vec<Value> = read(entries)
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "type": e.stage.stage_type(),
                "params": e.stage.get_params(),
            })
        })
        .collect();
    json!({ "stages": stages })
}

fn set_stage_param(entries: &Entries, stage_id: &str, name: &str, value: &Value) -> Result<()> {
    let stage = find(entries, stage_id).ok_or_else(|| StageError::StageNotFound {
        stage_id: stage_id.to_string(),
    })?;
    stage.set_param(name, value)
}

/// Ordered list of stages addressed by string id
#[derive(Default)]
pub struct StageChain {
    entries: Entries,
}

impl StageChain {
    /// Create a new empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn push(&self, id: impl Into<String>, stage: Arc<dyn Stage>) -> Result<()> {
        let len = self.len();
        self.insert_at(id, stage, len)
    }

    /// Insert a stage at `index` (clamped to the chain length)
    pub fn insert_at(&self, id: impl Into<String>, stage: Arc<dyn Stage>, index: usize) -> Result<()> {
        let id = id.into();
        let mut entries = write(&self.entries);
        if entries.iter().any(|e| e.id == id) {
            return Err(StageError::DuplicateStage { stage_id: id });
        }
        let index = index.min(entries.len());
        log::debug!("chain: inserting {} stage '{}' at {}", stage.stage_type(), id, index);
        entries.insert(index, ChainEntry { id, stage });
        Ok(())
    }

    /// Remove a stage by ID
    pub fn remove(&self, stage_id: &str) -> Result<Arc<dyn Stage>> {
        let mut entries = write(&self.entries);
        let index = position(&entries, stage_id)?;
        Ok(entries.remove(index).stage)
    }

    /// Get a stage by ID
    pub fn get(&self, stage_id: &str) -> Option<Arc<dyn Stage>> {
        find(&self.entries, stage_id)
    }

    /// Move a stage to a new position
    pub fn move_stage(&self, stage_id: &str, new_index: usize) -> Result<()> {
        let mut entries = write(&self.entries);
        let current = position(&entries, stage_id)?;
        let entry = entries.remove(current);
        let new_index = new_index.min(entries.len());
        entries.insert(new_index, entry);
        Ok(())
    }

    /// Run every stage once in order.
    ///
    /// Each stage processes only as many samples as its predecessor produced.
    /// Returns the sample count produced by the last stage, or 0 for an empty chain.
    pub fn execute(&self, pool: &mut BufferPool) -> usize {
        let entries = read(&self.entries);
        if entries.is_empty() {
            return 0;
        }
        entries
            .iter()
            .fold(usize::MAX, |available, e| e.stage.execute_available(pool, available))
    }

    /// Flush every stage
    pub fn flush(&self) {
        for e in read(&self.entries).iter() {
            e.stage.flush();
        }
    }

    /// Get the number of stages in the chain
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }

    /// Stage ids in chain order
    pub fn ids(&self) -> Vec<String> {
        read(&self.entries).iter().map(|e| e.id.clone()).collect()
    }

    /// Set one parameter of one stage
    pub fn set_param(&self, stage_id: &str, name: &str, value: &Value) -> Result<()> {
        set_stage_param(&self.entries, stage_id, name, value)
    }

    /// Every stage's parameters as JSON
    pub fn params(&self) -> Value {
        describe(&self.entries)
    }

    /// Handle for control threads
    pub fn control(&self) -> ChainControl {
        ChainControl {
            entries: self.entries.clone(),
        }
    }
}

/// Cloneable control handle to a [`StageChain`]
///
/// Sees stages added or removed after it was created.
#[derive(Clone)]
pub struct ChainControl {
    entries: Entries,
}

impl ChainControl {
    pub fn set_param(&self, stage_id: &str, name: &str, value: &Value) -> Result<()> {
        set_stage_param(&self.entries, stage_id, name, value)
    }

    pub fn params(&self) -> Value {
        describe(&self.entries)
    }

    pub fn get(&self, stage_id: &str) -> Option<Arc<dyn Stage>> {
        find(&self.entries, stage_id)
    }

    /// Enable or disable one stage
    pub fn set_enabled(&self, stage_id: &str, enabled: bool) -> Result<()> {
        let stage = self.get(stage_id).ok_or_else(|| StageError::StageNotFound {
            stage_id: stage_id.to_string(),
        })?;
        stage.set_enabled(enabled);
        Ok(())
    }
}
