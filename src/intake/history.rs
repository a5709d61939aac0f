//! Today's intake entries, kept in memory for display.

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeSource {
    Sensor,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEntry {
    pub id: Uuid,
    pub at: DateTime<Local>,
    pub volume_ml: f64,
    pub source: IntakeSource,
}

impl IntakeEntry {
    pub fn new(at: DateTime<Local>, volume_ml: f64, source: IntakeSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            at,
            volume_ml,
            source,
        }
    }

    pub fn hour(&self) -> u32 {
        self.at.hour()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntakeHistory {
    entries: Vec<IntakeEntry>,
}

impl IntakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: IntakeEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<IntakeEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Total volume per local hour of day, ascending by hour. Hours without intake are absent.
    pub fn hourly_totals(&self) -> Vec<(u32, f64)> {
        let mut buckets: BTreeMap<u32, f64> = BTreeMap::new();
        for entry in &self.entries {
            *buckets.entry(entry.hour()).or_insert(0.0) += entry.volume_ml;
        }
        buckets.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 3, hour, minute, 0)
            .earliest()
            .unwrap()
    }

    #[test]
    fn test_hourly_grouping() {
        let mut history = IntakeHistory::new();
        history.record(IntakeEntry::new(at(9, 5), 120.0, IntakeSource::Sensor));
        history.record(IntakeEntry::new(at(9, 40), 80.0, IntakeSource::Manual));
        history.record(IntakeEntry::new(at(14, 0), 240.0, IntakeSource::Manual));

        assert_eq!(history.hourly_totals(), vec![(9, 200.0), (14, 240.0)]);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut history = IntakeHistory::new();
        history.record(IntakeEntry::new(at(8, 0), 10.0, IntakeSource::Sensor));
        history.record(IntakeEntry::new(at(9, 0), 20.0, IntakeSource::Sensor));
        history.record(IntakeEntry::new(at(10, 0), 30.0, IntakeSource::Sensor));

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].volume_ml, 30.0);
        assert_eq!(recent[1].volume_ml, 20.0);
        assert_ne!(recent[0].id, recent[1].id);

        history.clear();
        assert!(history.is_empty());
    }
}
