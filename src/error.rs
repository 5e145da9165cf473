// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error taxonomy for the storage core.
//!
//! Errors are grouped by *kind*, not by subsystem: the same `BadArgument`
//! variant is raised whether the bad argument came from the registry, a
//! chunk, or the command buffer. `InvariantViolation` and `Overflow` are
//! never meant to be handled by a caller — they indicate the free-list or
//! occupancy bookkeeping is corrupted, and `World` aborts on them.

use std::fmt;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, EcsError>;

/// Error kinds raised by the storage core.
#[derive(Debug, Clone)]
pub enum EcsError {
    /// A component class was referenced that was never registered.
    UnregisteredType,

    /// A null/invalid argument, out-of-range index, or kind mismatch.
    BadArgument(String),

    /// Operation targeted an entity id not present in the entity index.
    EntityNotFound,

    /// A descriptor's field offsets overlap or exceed the declared total size.
    BadLayout(String),

    /// The composite-field dependency graph submitted to `register_batch` has a cycle.
    RegistrationCycle(String),

    /// Free-list or occupancy-bitset corruption. Process-fatal: `World` aborts on this.
    InvariantViolation(String),

    /// A chunk's size would exceed its capacity after a successful allocation.
    /// Defensive: implies free-list corruption. Process-fatal.
    Overflow(String),

    /// IO error, kept for symmetry with test fixtures that read files from disk.
    IoError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::UnregisteredType => write!(f, "component class not registered"),
            EcsError::BadArgument(msg) => write!(f, "bad argument: {msg}"),
            EcsError::EntityNotFound => write!(f, "entity not found"),
            EcsError::BadLayout(msg) => write!(f, "bad layout: {msg}"),
            EcsError::RegistrationCycle(msg) => write!(f, "registration cycle: {msg}"),
            EcsError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            EcsError::Overflow(msg) => write!(f, "overflow: {msg}"),
            EcsError::IoError(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<std::io::Error> for EcsError {
    fn from(err: std::io::Error) -> Self {
        EcsError::IoError(err.to_string())
    }
}

/// Aborts the process. Used at the handful of call sites where a
/// free-list/occupancy inconsistency must be treated as process-fatal
/// rather than recoverable.
#[track_caller]
pub(crate) fn abort_on_invariant_violation(err: &EcsError) -> ! {
    panic!("archon_ecs_core: world aborted on unrecoverable error: {err}");
}
