//! In-memory pool used by tests across the workspace.
//!
//! `FakePool` implements both ports and models an eventually consistent
//! provisioner: accepted changes become visible only after a configurable
//! number of observations, and new units may first show up with an empty
//! placeholder id.

use std::sync::{Mutex, MutexGuard};

use crate::ports::{PortFuture, ProvisionError, ProvisioningPort, UtilizationSampler};
use crate::types::{Unit, UnitId};

#[derive(Debug)]
enum Inflight {
    Add {
        id: UnitId,
        visible_at: u64,
        named_at: u64,
    },
    Remove {
        id: UnitId,
        gone_at: u64,
    },
}

#[derive(Debug)]
struct State {
    units: Vec<Unit>,
    inflight: Vec<Inflight>,
    /// Incremented on every observation.
    clock: u64,
    visible_after: u64,
    placeholder_for: u64,
    reachable: bool,
    accepting: bool,
    failing_lists: u32,
    next_id: u32,
    add_calls: u32,
    remove_calls: u32,
    removed: Vec<UnitId>,
}

/// Fake provisioner and sampler backed by a unit list.
#[derive(Debug)]
pub struct FakePool {
    state: Mutex<State>,
}

impl FakePool {
    pub fn new(units: Vec<Unit>) -> Self {
        Self {
            state: Mutex::new(State {
                units,
                inflight: Vec::new(),
                clock: 0,
                visible_after: 0,
                placeholder_for: 0,
                reachable: true,
                accepting: true,
                failing_lists: 0,
                next_id: 0,
                add_calls: 0,
                remove_calls: 0,
                removed: Vec::new(),
            }),
        }
    }

    /// A pool of `busy` busy units followed by `idle` idle units.
    pub fn with_counts(busy: usize, idle: usize) -> Self {
        let units = (0..busy)
            .map(|i| Unit::busy(format!("busy-{i}")))
            .chain((0..idle).map(|i| Unit::idle(format!("idle-{i}"))))
            .collect();
        Self::new(units)
    }

    /// Accepted changes stay invisible for `visible_after` observations;
    /// new units then show an empty id for `placeholder_for` more.
    pub fn with_lag(self, visible_after: u64, placeholder_for: u64) -> Self {
        {
            let mut state = self.lock();
            state.visible_after = visible_after;
            state.placeholder_for = placeholder_for;
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Fail the next `count` list calls.
    pub fn fail_next_lists(&self, count: u32) {
        self.lock().failing_lists = count;
    }

    pub fn set_units(&self, units: Vec<Unit>) {
        self.lock().units = units;
    }

    /// Settled unit ids, ignoring anything still in flight.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.lock().units.iter().map(|u| u.id.clone()).collect()
    }

    pub fn add_calls(&self) -> u32 {
        self.lock().add_calls
    }

    pub fn remove_calls(&self) -> u32 {
        self.lock().remove_calls
    }

    /// Ids passed to accepted remove requests, in order.
    pub fn removed(&self) -> Vec<UnitId> {
        self.lock().removed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observe(&self) -> Result<Vec<Unit>, ProvisionError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(ProvisionError::Unreachable("fake pool offline".to_string()));
        }
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(ProvisionError::Transport("fake list failure".to_string()));
        }

        state.clock += 1;
        let clock = state.clock;

        let mut placeholders = Vec::new();
        let mut still_inflight = Vec::new();
        for op in std::mem::take(&mut state.inflight) {
            match op {
                Inflight::Add {
                    id,
                    visible_at,
                    named_at,
                } => {
                    if named_at <= clock {
                        state.units.push(Unit::idle(id));
                    } else {
                        if visible_at <= clock {
                            placeholders.push(Unit {
                                idle: true,
                                ..Unit::pending("")
                            });
                        }
                        still_inflight.push(Inflight::Add {
                            id,
                            visible_at,
                            named_at,
                        });
                    }
                }
                Inflight::Remove { id, gone_at } => {
                    if gone_at <= clock {
                        state.units.retain(|u| u.id != id);
                    } else {
                        still_inflight.push(Inflight::Remove { id, gone_at });
                    }
                }
            }
        }
        state.inflight = still_inflight;

        let mut units = state.units.clone();
        units.extend(placeholders);
        Ok(units)
    }
}

impl ProvisioningPort for FakePool {
    fn probe(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            if self.lock().reachable {
                Ok(())
            } else {
                Err(ProvisionError::Unreachable("fake pool offline".to_string()))
            }
        })
    }

    fn add_unit(&self) -> PortFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            state.add_calls += 1;
            if !state.accepting {
                return Ok(false);
            }
            state.next_id += 1;
            let id = format!("new-{}", state.next_id);
            let visible_at = state.clock + 1 + state.visible_after;
            let named_at = visible_at + state.placeholder_for;
            state.inflight.push(Inflight::Add {
                id,
                visible_at,
                named_at,
            });
            Ok(true)
        })
    }

    fn remove_unit<'a>(&'a self, unit_id: &'a str) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            state.remove_calls += 1;
            if !state.accepting || !state.units.iter().any(|u| u.id == unit_id) {
                return Ok(false);
            }
            let gone_at = state.clock + 1 + state.visible_after;
            state.removed.push(unit_id.to_string());
            state.inflight.push(Inflight::Remove {
                id: unit_id.to_string(),
                gone_at,
            });
            Ok(true)
        })
    }

    fn list_unit_ids(&self) -> PortFuture<'_, Vec<UnitId>> {
        Box::pin(async move { Ok(self.observe()?.into_iter().map(|u| u.id).collect()) })
    }
}

impl UtilizationSampler for FakePool {
    fn list_units(&self) -> PortFuture<'_, Vec<Unit>> {
        Box::pin(async move { self.observe() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_becomes_visible_after_lag_with_placeholder() {
        let pool = FakePool::with_counts(1, 0).with_lag(1, 1);
        assert!(pool.add_unit().await.unwrap());

        // clock 1: not visible yet.
        assert_eq!(pool.list_unit_ids().await.unwrap(), vec!["busy-0"]);
        // clock 2: placeholder.
        assert_eq!(pool.list_unit_ids().await.unwrap(), vec!["busy-0", ""]);
        // clock 3: named.
        assert_eq!(pool.list_unit_ids().await.unwrap(), vec!["busy-0", "new-1"]);
    }

    #[tokio::test]
    async fn remove_refuses_unknown_ids() {
        let pool = FakePool::with_counts(0, 2);
        assert!(!pool.remove_unit("nope").await.unwrap());
        assert!(pool.remove_unit("idle-1").await.unwrap());
        assert_eq!(pool.list_unit_ids().await.unwrap(), vec!["idle-0"]);
        assert_eq!(pool.removed(), vec!["idle-1"]);
    }

    #[tokio::test]
    async fn failing_lists_recover() {
        let pool = FakePool::with_counts(1, 1);
        pool.fail_next_lists(1);
        assert!(pool.list_units().await.is_err());
        assert_eq!(pool.list_units().await.unwrap().len(), 2);
    }
}
