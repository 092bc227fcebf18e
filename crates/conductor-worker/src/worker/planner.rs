//! Execution slot planning per task type
//!
//! Either every task type gets an explicit slot count, or a shared pool is
//! split evenly across the distinct task types. Mixing the two is rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::ConfigError;

/// Largest slot count a single task type can hold
pub const MAX_THREAD_COUNT: usize = Semaphore::MAX_PERMITS;

fn check_upper_bound(count: usize) -> Result<usize, ConfigError> {
    if count > MAX_THREAD_COUNT {
        return Err(ConfigError::ThreadCountTooLarge {
            count,
            max: MAX_THREAD_COUNT,
        });
    }
    Ok(count)
}

/// How the allocation was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AllocationMode {
    /// Explicit count per task type
    PerType,
    /// `total` slots split evenly across task types
    Shared { total: usize },
}

/// Validated slot count per task type
///
/// In shared mode a task type may get zero slots when there are more task
/// types than slots; such a type never polls. See [`ThreadAllocation::starved`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadAllocation {
    mode: AllocationMode,
    counts: BTreeMap<String, usize>,
    defaulted: Vec<String>,
}

impl ThreadAllocation {
    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    /// Slots for `task_type`; zero for unknown types
    pub fn get(&self, task_type: &str) -> usize {
        self.counts.get(task_type).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Task types that fell back to one slot because no count was given
    pub fn defaulted(&self) -> &[String] {
        &self.defaulted
    }

    /// Task types left without any slot
    pub fn starved(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Total slots across all task types
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Compute the slot allocation for `task_types`
///
/// - `per_type` and `shared` together are a [`ConfigError::ConflictingThreadAllocation`]
/// - with `per_type`, types missing from the map get one slot
/// - otherwise `shared` (or the number of distinct types when unset) is split
///   evenly, rounding down
pub fn plan_thread_allocation<'a, I>(
    task_types: I,
    per_type: &HashMap<String, usize>,
    shared: Option<usize>,
) -> Result<ThreadAllocation, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    let task_types: BTreeSet<&str> = task_types.into_iter().collect();

    if !per_type.is_empty() && shared.is_some() {
        return Err(ConfigError::ConflictingThreadAllocation);
    }

    if !per_type.is_empty() {
        let mut counts = BTreeMap::new();
        for (task_type, count) in per_type {
            if *count < 1 {
                return Err(ConfigError::InvalidThreadCount {
                    task_type: task_type.clone(),
                    count: *count,
                });
            }
            let count = check_upper_bound(*count)?;
            if task_types.contains(task_type.as_str()) {
                counts.insert(task_type.clone(), count);
            }
        }

        let mut defaulted = Vec::new();
        for task_type in &task_types {
            if !counts.contains_key(*task_type) {
                info!(
                    task_type,
                    "No thread count specified for task type, defaulting to 1"
                );
                counts.insert(task_type.to_string(), 1);
                defaulted.push(task_type.to_string());
            }
        }

        return Ok(ThreadAllocation {
            mode: AllocationMode::PerType,
            counts,
            defaulted,
        });
    }

    let total = match shared {
        Some(0) => return Err(ConfigError::InvalidSharedThreadCount(0)),
        Some(n) => check_upper_bound(n)?,
        None => task_types.len(),
    };

    let split = if task_types.is_empty() {
        0
    } else {
        total / task_types.len()
    };
    if split == 0 && !task_types.is_empty() {
        warn!(
            total,
            task_types = task_types.len(),
            "Shared thread count is smaller than the number of task types, every task type is left without slots"
        );
    }

    Ok(ThreadAllocation {
        mode: AllocationMode::Shared { total },
        counts: task_types
            .into_iter()
            .map(|t| (t.to_string(), split))
            .collect(),
        defaulted: Vec::new(),
    })
}
