// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::memory::state::{UnitId, UnitState};
use std::collections::HashMap;

/// Per-spec queue of units ready to hand out.
///
/// A binary max-heap ordered by `(priority desc, name asc)`. Every unit
/// mirrors its position in `available_index` (1-based; 0 means absent),
/// updated on every swap, so membership tests, removal and reordering of an
/// arbitrary unit are cheap.
#[derive(Debug, Default)]
pub(crate) struct AvailableQueue {
    heap: Vec<UnitId>,
}

fn outranks(units: &HashMap<UnitId, UnitState>, a: UnitId, b: UnitId) -> bool {
    let (Some(a), Some(b)) = (units.get(&a), units.get(&b)) else {
        return false;
    };
    match a.meta.priority.total_cmp(&b.meta.priority) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.name < b.name,
    }
}

fn set_index(units: &mut HashMap<UnitId, UnitState>, id: UnitId, index: usize) {
    if let Some(unit) = units.get_mut(&id) {
        unit.available_index = index;
    }
}

impl AvailableQueue {
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, units: &HashMap<UnitId, UnitState>, id: UnitId) -> bool {
        units
            .get(&id)
            .map(|unit| unit.available_index > 0)
            .unwrap_or(false)
    }

    pub fn push(&mut self, units: &mut HashMap<UnitId, UnitState>, id: UnitId) {
        if self.contains(units, id) {
            return;
        }
        self.heap.push(id);
        let position = self.heap.len() - 1;
        set_index(units, id, position + 1);
        self.sift_up(units, position);
    }

    pub fn pop(&mut self, units: &mut HashMap<UnitId, UnitState>) -> Option<UnitId> {
        let top = *self.heap.first()?;
        self.remove(units, top);
        Some(top)
    }

    pub fn peek(&self) -> Option<UnitId> {
        self.heap.first().copied()
    }

    pub fn remove(&mut self, units: &mut HashMap<UnitId, UnitState>, id: UnitId) {
        let Some(index) = units.get(&id).map(|unit| unit.available_index) else {
            return;
        };
        if index == 0 {
            return;
        }
        let position = index - 1;
        let last = self.heap.len() - 1;
        self.heap.swap(position, last);
        self.heap.pop();
        set_index(units, id, 0);
        if position < self.heap.len() {
            let moved = self.heap[position];
            set_index(units, moved, position + 1);
            self.resift(units, position);
        }
    }

    /// Restores heap order after a unit's priority changed in place.
    pub fn reprioritize(&mut self, units: &mut HashMap<UnitId, UnitState>, id: UnitId) {
        let Some(index) = units.get(&id).map(|unit| unit.available_index) else {
            return;
        };
        if index == 0 {
            return;
        }
        self.resift(units, index - 1);
    }

    fn resift(&mut self, units: &mut HashMap<UnitId, UnitState>, position: usize) {
        let settled = self.sift_up(units, position);
        self.sift_down(units, settled);
    }

    fn sift_up(&mut self, units: &mut HashMap<UnitId, UnitState>, mut position: usize) -> usize {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !outranks(units, self.heap[position], self.heap[parent]) {
                break;
            }
            self.swap(units, position, parent);
            position = parent;
        }
        position
    }

    fn sift_down(&mut self, units: &mut HashMap<UnitId, UnitState>, mut position: usize) {
        loop {
            let left = 2 * position + 1;
            let right = left + 1;
            let mut best = position;
            if left < self.heap.len() && outranks(units, self.heap[left], self.heap[best]) {
                best = left;
            }
            if right < self.heap.len() && outranks(units, self.heap[right], self.heap[best]) {
                best = right;
            }
            if best == position {
                break;
            }
            self.swap(units, position, best);
            position = best;
        }
    }

    fn swap(&mut self, units: &mut HashMap<UnitId, UnitState>, a: usize, b: usize) {
        self.heap.swap(a, b);
        set_index(units, self.heap[a], a + 1);
        set_index(units, self.heap[b], b + 1);
    }
}
