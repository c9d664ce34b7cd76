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

//! The method surface the external RPC collaborator drives.
//!
//! Every method returns `(primary_result, message)` inside a `Result`; the
//! RPC layer renders that as its `(result, error_message, error)` wire
//! triple. A lookup miss on a method's principal argument lands in the
//! message, everything else is a hard error. Parameters arrive as loosely
//! typed values and pass through the decoder in [`decode`] before they
//! reach the strongly typed core.

pub mod config;
pub mod decode;
mod server;
mod specs;
mod units;
mod work;
mod workers;

pub use server::{GetWorkResponse, JobServer, JobServerError, WorkUnitTriple};

#[cfg(test)]
test_r::enable!();
