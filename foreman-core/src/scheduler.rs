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

//! Work spec selection.
//!
//! Strict priority first, then a weighted random draw among the top
//! priority class. Candidates arrive sorted by name, so the outcome is a
//! pure function of the metadata, the clock and the RNG state.

use chrono::{DateTime, Utc};
use foreman_common::model::{AttemptRequest, WorkSpecMeta};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;

use crate::memory::state::SpecId;

#[derive(Debug, Clone)]
pub(crate) struct SpecCandidate {
    pub spec: SpecId,
    pub name: String,
    pub meta: WorkSpecMeta,
}

/// Whether one spec survives the per-request filters.
pub(crate) fn eligible(
    name: &str,
    meta: &WorkSpecMeta,
    request: &AttemptRequest,
    now: DateTime<Utc>,
) -> bool {
    if let Some(whitelist) = &request.work_specs {
        if !whitelist.iter().any(|wanted| wanted == name) {
            return false;
        }
    }
    if let Some(runtimes) = &request.runtimes {
        if !runtimes.iter().any(|runtime| *runtime == meta.runtime) {
            return false;
        }
    }
    if meta.paused {
        return false;
    }
    if meta.available_count == 0 && !continuous_eligible(meta, now) {
        return false;
    }
    if meta.max_running > 0 && meta.pending_count >= meta.max_running {
        return false;
    }
    if request.available_gb > 0.0 && meta.min_memory_gb > request.available_gb {
        return false;
    }
    true
}

pub(crate) fn continuous_eligible(meta: &WorkSpecMeta, now: DateTime<Utc>) -> bool {
    meta.continuous
        && meta
            .next_continuous
            .map(|next| next <= now)
            .unwrap_or(true)
}

/// One-step preemption: a candidate whose `next_work_spec` names another
/// candidate with available work (and whose preempt flag is set) is dropped,
/// so the successor can never lose the draw to its predecessor.
pub(crate) fn apply_preemption(candidates: Vec<SpecCandidate>) -> Vec<SpecCandidate> {
    let preempted: HashSet<usize> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            if !candidate.meta.next_work_spec_preempts
                || candidate.meta.next_work_spec.is_empty()
            {
                return None;
            }
            let successor_has_work = candidates.iter().any(|other| {
                other.name == candidate.meta.next_work_spec && other.meta.available_count > 0
            });
            successor_has_work.then_some(index)
        })
        .collect();
    if preempted.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(index, candidate)| (!preempted.contains(&index)).then_some(candidate))
        .collect()
}

/// Picks one spec out of the filtered candidates: strictly highest
/// priority, weighted at random within that class.
pub(crate) fn choose_work_spec(
    candidates: &[SpecCandidate],
    rng: &mut StdRng,
) -> Option<SpecCandidate> {
    let top_priority = candidates
        .iter()
        .map(|candidate| candidate.meta.priority)
        .max()?;
    let class: Vec<&SpecCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.meta.priority == top_priority)
        .collect();
    let total_weight: i64 = class
        .iter()
        .map(|candidate| candidate.meta.weight.max(1) as i64)
        .sum();
    let mut draw = rng.random_range(0..total_weight);
    for candidate in &class {
        let weight = candidate.meta.weight.max(1) as i64;
        if draw < weight {
            return Some((*candidate).clone());
        }
        draw -= weight;
    }
    // total_weight covers every candidate, so the loop always returns
    None
}
