//! Hysteresis presence state machine.
//!
//! Turns the per-frame set of recognized employees into debounced IN/OUT
//! transitions. The two directions use different clocks:
//!
//! - ABSENT → PRESENT fires on a recognition once more than
//!   `in_threshold_secs` have passed since the employee's last state change.
//! - PRESENT → ABSENT fires once the employee has gone unrecognized for more
//!   than `out_threshold_secs`.

use crate::config::PipelineConfig;
use crate::types::{EmployeeId, EventKind, PresenceEvent};
use std::collections::{BTreeMap, BTreeSet};

/// Presence state of one employee.
///
/// Unset timestamps read as the clock origin (0.0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRecord {
    pub present: bool,
    pub last_seen: Option<f64>,
    pub last_state_change: Option<f64>,
}

pub struct PresenceTracker {
    records: BTreeMap<EmployeeId, PresenceRecord>,
    in_threshold_secs: f64,
    out_threshold_secs: f64,
}

impl PresenceTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            records: BTreeMap::new(),
            in_threshold_secs: config.in_threshold_secs,
            out_threshold_secs: config.out_threshold_secs,
        }
    }

    /// Start tracking `employee_id` as absent. Existing records are untouched.
    pub fn track(&mut self, employee_id: EmployeeId) {
        self.records.entry(employee_id).or_default();
    }

    pub fn track_all(&mut self, employee_ids: impl IntoIterator<Item = EmployeeId>) {
        for id in employee_ids {
            self.track(id);
        }
    }

    pub fn record(&self, employee_id: EmployeeId) -> Option<&PresenceRecord> {
        self.records.get(&employee_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Employees currently marked present.
    pub fn present(&self) -> impl Iterator<Item = EmployeeId> + '_ {
        self.records
            .iter()
            .filter(|(_, r)| r.present)
            .map(|(id, _)| *id)
    }

    /// Apply one cycle's recognitions at clock reading `now`.
    ///
    /// Returns the transitions that fired, ordered by employee id.
    pub fn update(&mut self, recognized: &BTreeSet<EmployeeId>, now: f64) -> Vec<PresenceEvent> {
        for id in recognized {
            self.records.entry(*id).or_default().last_seen = Some(now);
        }

        let mut events = Vec::new();
        for (id, record) in self.records.iter_mut() {
            let seen = recognized.contains(id);
            if seen && !record.present {
                let since_change = now - record.last_state_change.unwrap_or(0.0);
                if since_change > self.in_threshold_secs {
                    record.present = true;
                    record.last_state_change = Some(now);
                    tracing::info!(
                        employee = %id,
                        since_change,
                        "employee marked IN"
                    );
                    events.push(PresenceEvent {
                        employee_id: *id,
                        kind: EventKind::In,
                        at: now,
                    });
                }
            } else if !seen && record.present {
                let since_seen = now - record.last_seen.unwrap_or(0.0);
                if since_seen > self.out_threshold_secs {
                    record.present = false;
                    record.last_state_change = Some(now);
                    tracing::info!(
                        employee = %id,
                        since_seen,
                        "employee marked OUT"
                    );
                    events.push(PresenceEvent {
                        employee_id: *id,
                        kind: EventKind::Out,
                        at: now,
                    });
                }
            }
        }
        events
    }
}
