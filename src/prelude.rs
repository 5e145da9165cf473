//! Convenient re-exports of commonly used types.
//!
//! ```
//! use archon_ecs_core::prelude::*;
//! ```

pub use crate::config::WorldConfig;
pub use crate::entity::EntityId;
pub use crate::error::{EcsError, Result};
pub use crate::layout::{ComponentKind, FieldSpec, LayoutPolicy, PrimitiveKind};
pub use crate::query::{EntityView, QueryBuilder};
pub use crate::registry::{ComponentTypeId, ComponentTypeSpec};
pub use crate::world::World;
