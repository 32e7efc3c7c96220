//! Join synchronization
//!
//! Branches of an expansion finish in any order. The synchronizer keeps one
//! outcome per branch and releases a join only once every branch has
//! reported; the joined values always come back in the original key order.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ExpansionError, Result};
use crate::expansion::{BranchKey, Expansion};
use crate::types::PortId;

/// Values collected across branches, index-aligned with their keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedCollection<T = serde_json::Value> {
    keys: Vec<BranchKey>,
    values: Vec<T>,
}

impl<T> JoinedCollection<T> {
    /// Order `reported` values by `keys`
    ///
    /// Every key must have exactly one value and no value may carry an
    /// unknown key.
    pub fn from_branches(
        expansion: &str,
        keys: &[BranchKey],
        reported: Vec<(BranchKey, T)>,
    ) -> Result<Self> {
        if reported.len() != keys.len() {
            return Err(ExpansionError::JoinMismatch {
                expansion: expansion.to_string(),
                reason: format!("{} values for {} branches", reported.len(), keys.len()),
            }
            .into());
        }
        let mut by_key: BTreeMap<BranchKey, T> = BTreeMap::new();
        for (key, value) in reported {
            if !keys.contains(&key) {
                return Err(ExpansionError::JoinMismatch {
                    expansion: expansion.to_string(),
                    reason: format!("unknown branch key '{}'", key),
                }
                .into());
            }
            match by_key.entry(key) {
                Entry::Occupied(entry) => {
                    return Err(ExpansionError::JoinMismatch {
                        expansion: expansion.to_string(),
                        reason: format!("branch '{}' reported more than once", entry.key()),
                    }
                    .into());
                }
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
            }
        }

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = by_key.remove(key).ok_or_else(|| ExpansionError::JoinMismatch {
                expansion: expansion.to_string(),
                reason: format!("branch '{}' did not report", key),
            })?;
            values.push(value);
        }
        Ok(Self {
            keys: keys.to_vec(),
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> &[BranchKey] {
        &self.keys
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Value for a branch key
    pub fn get(&self, key: &BranchKey) -> Option<&T> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| &self.values[i])
    }

    /// `(key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&BranchKey, &T)> {
        self.keys.iter().zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }
}

impl JoinedCollection<serde_json::Value> {
    /// The collected values as a JSON array, in key order
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.values.clone())
    }
}

/// What a branch produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome {
    /// Output values of the branch's last node, by field
    Completed { outputs: BTreeMap<PortId, serde_json::Value> },
    Failed { reason: String },
}

impl BranchOutcome {
    pub fn completed(outputs: BTreeMap<PortId, serde_json::Value>) -> Self {
        Self::Completed { outputs }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
struct JoinState {
    keys: Vec<BranchKey>,
    outcomes: BTreeMap<BranchKey, BranchOutcome>,
}

/// Tracks branch outcomes per expansion and releases joins
#[derive(Debug, Default)]
pub struct JoinSynchronizer {
    states: BTreeMap<String, JoinState>,
}

impl JoinSynchronizer {
    /// Track every expansion in `expansions`
    pub fn new(expansions: &[Expansion]) -> Self {
        let states = expansions
            .iter()
            .map(|e| {
                (
                    e.id.clone(),
                    JoinState {
                        keys: e.keys().cloned().collect(),
                        outcomes: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self { states }
    }

    fn state(&self, expansion: &str) -> Result<&JoinState> {
        self.states
            .get(expansion)
            .ok_or_else(|| ExpansionError::UnknownExpansion(expansion.to_string()).into())
    }

    /// Record the outcome of one branch; completion order is irrelevant
    pub fn record(&mut self, expansion: &str, key: &BranchKey, outcome: BranchOutcome) -> Result<()> {
        let state = self
            .states
            .get_mut(expansion)
            .ok_or_else(|| ExpansionError::UnknownExpansion(expansion.to_string()))?;
        if !state.keys.contains(key) {
            return Err(ExpansionError::JoinMismatch {
                expansion: expansion.to_string(),
                reason: format!("unknown branch key '{}'", key),
            }
            .into());
        }
        log::debug!("branch '{}' of '{}' reported", key, expansion);
        state.outcomes.insert(key.clone(), outcome);
        Ok(())
    }

    /// Keys of the branches that have not reported yet, in key order
    pub fn pending(&self, expansion: &str) -> Result<Vec<BranchKey>> {
        let state = self.state(expansion)?;
        Ok(state
            .keys
            .iter()
            .filter(|k| !state.outcomes.contains_key(*k))
            .cloned()
            .collect())
    }

    /// Whether every branch has reported
    pub fn is_ready(&self, expansion: &str) -> bool {
        self.pending(expansion).is_ok_and(|p| p.is_empty())
    }

    /// Collect one output field across all branches, in key order
    ///
    /// Fails while branches are pending, and fails as a whole if any branch
    /// failed.
    pub fn join(&self, expansion: &str, field: &str) -> Result<JoinedCollection> {
        let pending = self.pending(expansion)?;
        if !pending.is_empty() {
            return Err(ExpansionError::JoinPending {
                expansion: expansion.to_string(),
                pending: pending.iter().map(BranchKey::qualifier).collect(),
            }
            .into());
        }

        let state = self.state(expansion)?;
        let mut reported = Vec::with_capacity(state.keys.len());
        for key in &state.keys {
            match state.outcomes.get(key) {
                Some(BranchOutcome::Completed { outputs }) => {
                    let value = outputs.get(field).cloned().ok_or_else(|| {
                        ExpansionError::JoinMismatch {
                            expansion: expansion.to_string(),
                            reason: format!("branch '{}' has no output '{}'", key, field),
                        }
                    })?;
                    reported.push((key.clone(), value));
                }
                Some(BranchOutcome::Failed { reason }) => {
                    return Err(ExpansionError::BranchFailed {
                        expansion: expansion.to_string(),
                        branch: key.qualifier(),
                        reason: reason.clone(),
                    }
                    .into());
                }
                None => {
                    return Err(ExpansionError::JoinPending {
                        expansion: expansion.to_string(),
                        pending: vec![key.qualifier()],
                    }
                    .into());
                }
            }
        }
        JoinedCollection::from_branches(expansion, &state.keys, reported)
    }
}
