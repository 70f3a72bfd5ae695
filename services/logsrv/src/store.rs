//! Live register value store.
//!
//! One entry per polled register, updated every tick by the poll loop and
//! read concurrently by the interval timers of all loggers. Snapshots are
//! copy-out: readers get an owned map and never see a half-written state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Data quality of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    /// The last poll of this register failed; the value shown is stale
    Error,
}

/// Latest observation of one register
#[derive(Debug, Clone)]
pub struct PointData {
    pub value: String,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

/// Shared value store keyed by register field name
#[derive(Debug, Default)]
pub struct ValueStore {
    points: DashMap<String, PointData>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh good value.
    pub fn update(&self, field_name: &str, value: String) {
        self.points.insert(
            field_name.to_string(),
            PointData {
                value,
                quality: Quality::Good,
                timestamp: Utc::now(),
            },
        );
    }

    /// Flags a failed poll. The last good value stays visible so gate
    /// expressions keep referencing the latest actual observation.
    pub fn mark_error(&self, field_name: &str) {
        if let Some(mut point) = self.points.get_mut(field_name) {
            point.quality = Quality::Error;
        }
    }

    pub fn get(&self, field_name: &str) -> Option<PointData> {
        self.points.get(field_name).map(|p| p.value().clone())
    }

    /// Copies out field name → latest value for every observed register.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.points
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }
}
