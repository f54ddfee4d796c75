//! The slot table: one entry per potential engine process.
//!
//! Only [`EnginePool`](super::EnginePool) touches the table, and always under
//! its mutex; a slot never moves to `Busy` anywhere else.

use std::fmt;

use piperlink_core::{EngineProcess, EngineSpec, RequestId};

/// Stable identifier of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

pub(crate) enum SlotState {
    /// No process; the next claim spawns one.
    Empty,
    /// A live process waiting for work.
    Idle {
        process: Box<dyn EngineProcess>,
        spec: EngineSpec,
    },
    /// Claimed by a lease.
    Busy { request: RequestId },
}

pub(crate) struct Slot {
    id: WorkerId,
    state: SlotState,
    last_used: u64,
}

/// Result of claiming a slot.
pub(crate) struct Claim {
    pub index: usize,
    pub worker: WorkerId,
    /// The idle process previously parked in the slot, with its spec.
    pub previous: Option<(Box<dyn EngineProcess>, EngineSpec)>,
}

/// Slot counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    pub empty: usize,
}

pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    tick: u64,
}

impl SlotTable {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size)
                .map(|i| Slot {
                    id: WorkerId(i),
                    state: SlotState::Empty,
                    last_used: 0,
                })
                .collect(),
            tick: 0,
        }
    }

    /// Pick a slot for `spec` and mark it busy.
    ///
    /// Preference: an idle process already bound to `spec`, then an empty
    /// slot, then the least recently used idle process.
    pub fn claim(&mut self, spec: &EngineSpec, request: RequestId) -> Option<Claim> {
        let matching = self.slots.iter().position(
            |slot| matches!(&slot.state, SlotState::Idle { spec: s, .. } if s == spec),
        );
        let index = matching
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|slot| matches!(slot.state, SlotState::Empty))
            })
            .or_else(|| {
                self.slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| matches!(slot.state, SlotState::Idle { .. }))
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(i, _)| i)
            })?;

        let slot = &mut self.slots[index];
        let previous = match std::mem::replace(&mut slot.state, SlotState::Busy { request }) {
            SlotState::Idle { process, spec } => Some((process, spec)),
            SlotState::Empty | SlotState::Busy { .. } => None,
        };

        Some(Claim {
            index,
            worker: slot.id,
            previous,
        })
    }

    /// Return a live process to its slot.
    pub fn park(&mut self, index: usize, process: Box<dyn EngineProcess>, spec: EngineSpec) {
        self.tick += 1;
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Idle { process, spec };
            slot.last_used = self.tick;
        }
    }

    /// Mark a slot as having no process.
    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Empty;
        }
    }

    /// Remove every idle process, leaving their slots empty.
    pub fn drain_idle(&mut self) -> Vec<Box<dyn EngineProcess>> {
        let mut drained = Vec::new();
        for slot in &mut self.slots {
            if matches!(slot.state, SlotState::Idle { .. }) {
                if let SlotState::Idle { process, .. } =
                    std::mem::replace(&mut slot.state, SlotState::Empty)
                {
                    drained.push(process);
                }
            }
        }
        drained
    }

    /// Request currently holding `index`, if busy.
    pub fn holder(&self, index: usize) -> Option<RequestId> {
        match self.slots.get(index)?.state {
            SlotState::Busy { request } => Some(request),
            _ => None,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            size: self.slots.len(),
            ..PoolStats::default()
        };
        for slot in &self.slots {
            match slot.state {
                SlotState::Empty => stats.empty += 1,
                SlotState::Idle { .. } => stats.idle += 1,
                SlotState::Busy { .. } => stats.busy += 1,
            }
        }
        stats
    }
}
