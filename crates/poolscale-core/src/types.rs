//! Domain types for the managed pool.
//!
//! Units are owned by the external provisioning system; these types only
//! describe what was observed on a given tick.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identifier of a unit (node address, worker id, pod name).
pub type UnitId = String;

// ── Unit ──────────────────────────────────────────────────────────

/// A single provisioned worker as reported by the sampler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Unit {
    pub id: UnitId,
    /// No workload is assigned to this unit.
    #[serde(default)]
    pub idle: bool,
    /// Requested but not yet schedulable.
    #[serde(default)]
    pub pending: bool,
    /// Cores currently in use (framework workers only).
    #[serde(default)]
    pub cores_used: u32,
}

impl Unit {
    pub fn idle(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            idle: true,
            ..Self::default()
        }
    }

    pub fn busy(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn pending(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            pending: true,
            ..Self::default()
        }
    }

    /// Set the number of cores in use.
    pub fn with_cores_used(mut self, cores_used: u32) -> Self {
        self.cores_used = cores_used;
        self
    }
}

/// A workload (pod) and the unit it is placed on, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    #[serde(default)]
    pub node: Option<UnitId>,
}

impl Workload {
    pub fn placed(name: impl Into<String>, node: impl Into<UnitId>) -> Self {
        Self {
            name: name.into(),
            node: Some(node.into()),
        }
    }

    pub fn unscheduled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: None,
        }
    }

    fn assigned_node(&self) -> Option<&str> {
        self.node.as_deref().filter(|node| !node.is_empty())
    }
}

/// Units that carry no workload, in `unit_ids` order.
///
/// Workloads without a node are skipped. Empty unit ids (units still
/// being provisioned) are never reported as unused.
pub fn find_unused_units(workloads: &[Workload], unit_ids: &[UnitId]) -> Vec<UnitId> {
    let mut occupied: HashSet<&str> = HashSet::new();
    for workload in workloads {
        match workload.assigned_node() {
            Some(node) => {
                occupied.insert(node);
            }
            None => {
                warn!(workload = %workload.name, "workload has no node assigned");
            }
        }
    }

    unit_ids
        .iter()
        .filter(|id| !id.is_empty() && !occupied.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Number of workloads waiting for a node.
pub fn count_unscheduled(workloads: &[Workload]) -> usize {
    workloads
        .iter()
        .filter(|workload| workload.assigned_node().is_none())
        .count()
}

/// Build the unit list for a node pool from its node ids and workloads.
///
/// Unused nodes are idle. Nodes reported with an empty id are still
/// being provisioned: they carry no workload, so they are both idle and
/// pending, which nets them out of the effective idle count.
pub fn units_from_assignments(unit_ids: &[UnitId], workloads: &[Workload]) -> Vec<Unit> {
    let unused: HashSet<UnitId> = find_unused_units(workloads, unit_ids).into_iter().collect();

    unit_ids
        .iter()
        .map(|id| {
            if id.is_empty() {
                Unit {
                    idle: true,
                    ..Unit::pending(id.clone())
                }
            } else if unused.contains(id) {
                Unit::idle(id.clone())
            } else {
                Unit::busy(id.clone())
            }
        })
        .collect()
}

// ── Sampling ──────────────────────────────────────────────────────

/// One sampler reading: the units plus any workloads still waiting
/// for placement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sample {
    pub units: Vec<Unit>,
    pub unscheduled_workloads: usize,
}

impl Sample {
    pub fn from_units(units: Vec<Unit>) -> Self {
        Self {
            units,
            unscheduled_workloads: 0,
        }
    }

    /// Build a node-pool sample from node ids and workload placements.
    pub fn from_assignments(unit_ids: &[UnitId], workloads: &[Workload]) -> Self {
        Self {
            units: units_from_assignments(unit_ids, workloads),
            unscheduled_workloads: count_unscheduled(workloads),
        }
    }

    pub fn snapshot(&self) -> UtilizationSnapshot {
        UtilizationSnapshot::from_units(&self.units)
            .with_unscheduled_workloads(self.unscheduled_workloads)
    }
}

/// Utilization observed on a single tick. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtilizationSnapshot {
    pub total_units: u32,
    pub idle_units: u32,
    pub pending_units: u32,
    /// Workloads waiting for a unit; each will absorb one idle unit.
    pub unscheduled_workloads: u32,
    /// Sum of cores in use across all units.
    pub cores_used: u64,
}

impl UtilizationSnapshot {
    pub fn from_units(units: &[Unit]) -> Self {
        let mut snapshot = Self {
            total_units: saturating_u32(units.len()),
            ..Self::default()
        };
        for unit in units {
            if unit.idle {
                snapshot.idle_units += 1;
            }
            if unit.pending {
                snapshot.pending_units += 1;
            }
            snapshot.cores_used += u64::from(unit.cores_used);
        }
        snapshot
    }

    pub fn with_unscheduled_workloads(mut self, count: usize) -> Self {
        self.unscheduled_workloads = saturating_u32(count);
        self
    }

    /// Idle units available to absorb load.
    ///
    /// Pending units and waiting workloads are subtracted so that
    /// capacity already in flight is not counted twice.
    pub fn effective_idle(&self) -> u32 {
        self.idle_units
            .saturating_sub(self.pending_units)
            .saturating_sub(self.unscheduled_workloads)
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ── Pool ──────────────────────────────────────────────────────────

/// Size bounds for the managed pool.
///
/// `min_units + extra_capacity <= max_units` must hold for the policy to
/// produce a decision; violations surface as policy errors per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub min_units: u32,
    pub max_units: u32,
    /// Idle units to keep on hand as headroom.
    pub extra_capacity: u32,
}

impl PoolBounds {
    pub fn new(min_units: u32, max_units: u32, extra_capacity: u32) -> Self {
        Self {
            min_units,
            max_units,
            extra_capacity,
        }
    }

    /// Smallest size that still holds the idle buffer on top of the minimum.
    pub fn floor(&self) -> u64 {
        u64::from(self.min_units) + u64::from(self.extra_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<UnitId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unused_units_exclude_occupied() {
        let workloads = vec![Workload::placed("spark-worker-1", "A")];
        assert_eq!(find_unused_units(&workloads, &ids(&["A", "B"])), ids(&["B"]));
    }

    #[test]
    fn unused_units_skip_empty_ids_and_unplaced_workloads() {
        let workloads = vec![
            Workload::placed("w1", "10.0.0.1"),
            Workload::unscheduled("w2"),
            Workload::placed("w3", ""),
        ];
        let unused = find_unused_units(&workloads, &ids(&["10.0.0.1", "", "10.0.0.2", "10.0.0.3"]));
        assert_eq!(unused, ids(&["10.0.0.2", "10.0.0.3"]));
        assert_eq!(count_unscheduled(&workloads), 2);
    }

    #[test]
    fn units_from_assignments_marks_states() {
        let workloads = vec![Workload::placed("w1", "A")];
        let units = units_from_assignments(&ids(&["A", "B", ""]), &workloads);
        assert_eq!(units[0], Unit::busy("A"));
        assert_eq!(units[1], Unit::idle("B"));
        assert!(units[2].idle && units[2].pending);

        // The provisioning node does not count towards usable idle capacity.
        let snapshot = UtilizationSnapshot::from_units(&units);
        assert_eq!(snapshot.effective_idle(), 1);
    }

    #[test]
    fn snapshot_counts_units() {
        let units = vec![
            Unit::busy("a").with_cores_used(3),
            Unit::idle("b"),
            Unit::idle("c"),
            Unit::pending("d"),
        ];
        let snapshot = UtilizationSnapshot::from_units(&units);
        assert_eq!(snapshot.total_units, 4);
        assert_eq!(snapshot.idle_units, 2);
        assert_eq!(snapshot.pending_units, 1);
        assert_eq!(snapshot.cores_used, 3);
        assert_eq!(snapshot.effective_idle(), 1);
    }

    #[test]
    fn effective_idle_never_underflows() {
        let snapshot = UtilizationSnapshot {
            total_units: 3,
            idle_units: 1,
            pending_units: 2,
            unscheduled_workloads: 4,
            cores_used: 0,
        };
        assert_eq!(snapshot.effective_idle(), 0);
    }

    #[test]
    fn assignment_sample_subtracts_waiting_workloads() {
        let workloads = vec![
            Workload::placed("w1", "A"),
            Workload::unscheduled("w2"),
        ];
        let sample = Sample::from_assignments(&ids(&["A", "B", "C"]), &workloads);
        let snapshot = sample.snapshot();
        assert_eq!(snapshot.total_units, 3);
        assert_eq!(snapshot.idle_units, 2);
        assert_eq!(snapshot.effective_idle(), 1);
    }

    #[test]
    fn unit_deserializes_with_defaults() {
        let unit: Unit = serde_json::from_str(r#"{"id":"10.0.0.7"}"#).unwrap();
        assert_eq!(unit, Unit::busy("10.0.0.7"));
    }

    #[test]
    fn bounds_floor_does_not_overflow() {
        let bounds = PoolBounds::new(u32::MAX, u32::MAX, 1);
        assert_eq!(bounds.floor(), u64::from(u32::MAX) + 1);
    }
}
