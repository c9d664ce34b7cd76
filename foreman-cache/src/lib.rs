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

//! Client-side caching proxy over any coordinator backend.
//!
//! Entity handles are cached by name in per-level LRU maps. Every wrapped
//! call that comes back with the stale-handle signal (`Gone`) refetches
//! the owning entity by name from one level up, swaps the stored handle and
//! retries exactly once; when the refetch itself fails the cache entry is
//! evicted and the caller sees the original error. Concurrent observers of
//! one stale handle are serialized so the upstream sees a single refetch.

mod attempt;
mod cell;
pub mod config;
mod coordinate;
mod namespace;
mod work_spec;
mod work_unit;
mod worker;

pub use config::CacheConfig;
pub use coordinate::CachedCoordinate;

#[cfg(test)]
test_r::enable!();
