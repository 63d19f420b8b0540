//! Bookkeeping of event occurrences for the backward replay.
//!
//! The forward pass appends one entry per event occurrence. An occurrence
//! whose fired indices have all reached the per-index cap leaves only an
//! overflow marker, so the backward pass can still undo its heaviside
//! increments without replaying a bolus.

use nalgebra::{DMatrix, DVector};
use sensode_core::{EventTiming, RootDirection};

/// Primary root of a secondary occurrence, snapshotted before the primary event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub ie: usize,
    pub x: DVector<f64>,
    pub xdot: DVector<f64>,
}

/// Forward snapshot of one event occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: f64,
    /// Direction of every event index at this occurrence.
    pub mask: Vec<RootDirection>,
    /// State before any bolus of this occurrence.
    pub x: DVector<f64>,
    /// Right-hand side after the boluses.
    pub xdot: DVector<f64>,
    /// Right-hand side before the boluses.
    pub xdot_old: DVector<f64>,
    /// State derivative of the event-observable likelihood (`nj x nx`).
    pub djzdx: Option<DMatrix<f64>>,
    /// Set for secondary events only.
    pub trigger: Option<EventTrigger>,
}

impl EventRecord {
    /// Root that fixed the time of this occurrence, for fired index `ie`.
    pub fn timing(&self, ie: usize) -> EventTiming<'_> {
        match &self.trigger {
            Some(trigger) => EventTiming {
                ie: trigger.ie,
                x: &trigger.x,
                xdot: &trigger.xdot,
            },
            None => EventTiming {
                ie,
                x: &self.x,
                xdot: &self.xdot_old,
            },
        }
    }

    pub fn is_secondary(&self) -> bool {
        self.trigger.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    Recorded(EventRecord),
    /// Occurrence of capped indices: only the heaviside update is kept.
    Overflow { time: f64, mask: Vec<RootDirection> },
}

impl LedgerEntry {
    pub fn time(&self) -> f64 {
        match self {
            Self::Recorded(record) => record.time,
            Self::Overflow { time, .. } => *time,
        }
    }

    pub fn mask(&self) -> &[RootDirection] {
        match self {
            Self::Recorded(record) => &record.mask,
            Self::Overflow { mask, .. } => mask,
        }
    }
}

/// Ordered event history of one forward pass.
#[derive(Debug, Clone)]
pub struct EventLedger {
    entries: Vec<LedgerEntry>,
    counts: Vec<usize>,
    warned: Vec<bool>,
    nmaxevent: usize,
}

impl EventLedger {
    pub fn new(ne: usize, nmaxevent: usize) -> Self {
        Self {
            entries: Vec::new(),
            counts: vec![0; ne],
            warned: vec![false; ne],
            nmaxevent,
        }
    }

    /// Append an occurrence; returns whether an [`EventRecord`] was stored.
    ///
    /// Fired indices that already have `nmaxevent` records are split off
    /// into an overflow marker.
    pub fn record(&mut self, mut record: EventRecord) -> bool {
        let mut overflow = vec![RootDirection::None; record.mask.len()];
        let mut any_capped = false;
        let mut any_recorded = false;
        for (ie, dir) in record.mask.iter_mut().enumerate() {
            if !dir.is_fired() {
                continue;
            }
            let count = self.counts.get(ie).copied().unwrap_or(0);
            if count >= self.nmaxevent {
                if !self.warned.get(ie).copied().unwrap_or(true) {
                    log::warn!(
                        "Event {ie} fired more than nmaxevent = {} times, further occurrences are not recorded",
                        self.nmaxevent
                    );
                    self.warned[ie] = true;
                }
                overflow[ie] = *dir;
                *dir = RootDirection::None;
                any_capped = true;
            } else {
                if let Some(c) = self.counts.get_mut(ie) {
                    *c += 1;
                }
                any_recorded = true;
            }
        }

        if any_capped {
            self.entries.push(LedgerEntry::Overflow {
                time: record.time,
                mask: overflow,
            });
        }
        if any_recorded {
            self.entries.push(LedgerEntry::Recorded(record));
        }
        any_recorded
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Stored event records in chronological order.
    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.entries.iter().filter_map(|entry| match entry {
            LedgerEntry::Recorded(record) => Some(record),
            LedgerEntry::Overflow { .. } => None,
        })
    }

    /// Number of recorded occurrences of event `ie` not yet replayed.
    pub fn count(&self, ie: usize) -> usize {
        self.counts.get(ie).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time of the latest entry not yet replayed.
    pub fn last_time(&self) -> Option<f64> {
        self.entries.last().map(LedgerEntry::time)
    }

    /// Remove the latest entry for replay.
    pub fn pop(&mut self) -> Option<LedgerEntry> {
        let entry = self.entries.pop()?;
        if let LedgerEntry::Recorded(record) = &entry {
            for (ie, dir) in record.mask.iter().enumerate() {
                if let (true, Some(c)) = (dir.is_fired(), self.counts.get_mut(ie)) {
                    *c = c.saturating_sub(1);
                }
            }
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64, mask: Vec<RootDirection>) -> EventRecord {
        EventRecord {
            time,
            mask,
            x: DVector::zeros(1),
            xdot: DVector::zeros(1),
            xdot_old: DVector::zeros(1),
            djzdx: None,
            trigger: None,
        }
    }

    #[test]
    fn test_records_in_order() {
        let mut ledger = EventLedger::new(1, 5);
        assert!(ledger.record(record(0.5, vec![RootDirection::Rising])));
        assert!(ledger.record(record(1.5, vec![RootDirection::Falling])));
        assert_eq!(ledger.records().count(), 2);
        assert_eq!(ledger.count(0), 2);
        assert_eq!(ledger.last_time(), Some(1.5));
        assert_eq!(ledger.pop().map(|e| e.time()), Some(1.5));
        assert_eq!(ledger.last_time(), Some(0.5));
        assert_eq!(ledger.count(0), 1);
    }

    #[test]
    fn test_pop_leaves_overflow_out_of_counts() {
        let mut ledger = EventLedger::new(1, 1);
        ledger.record(record(0.5, vec![RootDirection::Rising]));
        ledger.record(record(1.0, vec![RootDirection::Rising]));
        assert_eq!(ledger.count(0), 1);
        assert!(matches!(ledger.pop(), Some(LedgerEntry::Overflow { .. })));
        assert_eq!(ledger.count(0), 1);
        assert!(matches!(ledger.pop(), Some(LedgerEntry::Recorded(_))));
        assert_eq!(ledger.count(0), 0);
        assert!(ledger.pop().is_none());
    }

    #[test]
    fn test_secondary_record_is_timed_by_trigger() {
        let mut secondary = record(1.0, vec![RootDirection::None, RootDirection::Rising]);
        secondary.xdot_old = DVector::from_element(1, 4.0);
        let primary = record(1.0, vec![RootDirection::Rising, RootDirection::None]);
        assert_eq!(primary.timing(0).ie, 0);
        assert_eq!(primary.timing(0).xdot[0], 0.0);

        secondary.trigger = Some(EventTrigger {
            ie: 0,
            x: DVector::from_element(1, 2.0),
            xdot: DVector::from_element(1, 3.0),
        });
        assert!(secondary.is_secondary());
        let timing = secondary.timing(1);
        assert_eq!(timing.ie, 0);
        assert_eq!(timing.x[0], 2.0);
        assert_eq!(timing.xdot[0], 3.0);
    }

    #[test]
    fn test_cap_per_index() {
        let mut ledger = EventLedger::new(2, 2);
        for i in 0..5 {
            ledger.record(record(i as f64, vec![RootDirection::Rising, RootDirection::None]));
        }
        assert_eq!(ledger.records().count(), 2);
        assert_eq!(ledger.count(0), 2);
        assert_eq!(ledger.len(), 5);
        assert!(matches!(ledger.entries()[4], LedgerEntry::Overflow { .. }));
    }

    #[test]
    fn test_capped_index_split_from_simultaneous_record() {
        let mut ledger = EventLedger::new(2, 1);
        ledger.record(record(0.0, vec![RootDirection::Rising, RootDirection::None]));
        let stored = ledger.record(record(1.0, vec![RootDirection::Rising, RootDirection::Falling]));
        assert!(stored);
        let entries = ledger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].mask(), &[RootDirection::Rising, RootDirection::None]);
        assert_eq!(entries[2].mask(), &[RootDirection::None, RootDirection::Falling]);
        assert_eq!(ledger.count(1), 1);
    }
}
