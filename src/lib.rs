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

//! archon_ecs_core - Archetype-based ECS storage core
//!
//! Chunked SoA archetype storage, a lock-free slot allocator, structural
//! transitions, and a sort-on-playback command buffer, fronted by a single
//! [`World`] facade.

pub mod archetype;
pub mod archetype_manager;
pub mod arena;
pub mod bitset;
pub mod chunk;
pub mod chunk_group;
pub mod command;
pub mod config;
pub mod entity;
pub mod entity_index;
pub mod error;
pub mod layout;
pub mod managed;
pub mod mask;
pub mod prelude;
pub mod query;
pub mod registry;
pub mod shared_key;
pub mod shared_store;
pub mod structural;
pub mod world;

pub use archetype::Archetype;
pub use command::CommandBuffer;
pub use config::WorldConfig;
pub use entity::EntityId;
pub use error::{EcsError, Result};
pub use query::QueryBuilder;
pub use registry::ComponentTypeId;
pub use world::World;
