//! Ferrule ECS -- dense component tables with a transform hierarchy.
//!
//! An [`EntityGroup`](group::EntityGroup) owns one monotonic identity
//! allocator and one [`ComponentTable`](table::ComponentTable) per component
//! kind. Tables are dense (ids and records in parallel vectors) with a hash
//! index for O(1) lookup and swap-remove deletion. Entities form a
//! parent/child hierarchy through their transforms, with cached world
//! matrices kept up to date synchronously by every hierarchy operation.
//!
//! # Quick Start
//!
//! ```
//! use ferrule_ecs::prelude::*;
//!
//! let mut group = EntityGroup::new();
//! let body = group.create_entity("body");
//! let head = group.create_entity("head");
//! group.set_local_position(head, Vec3::new(0.0, 1.5, 0.0)).unwrap();
//! group.attach_keep_local(head, body).unwrap();
//!
//! group.set_local_position(body, Vec3::new(4.0, 0.0, 0.0)).unwrap();
//! assert_eq!(group.position(head), Some(Vec3::new(4.0, 1.5, 0.0)));
//!
//! group.insert(head, Camera::default()).unwrap();
//! assert!(group.destroy_entity(body));
//! assert!(!group.contains(head));
//! ```

#![deny(unsafe_code)]

pub mod asset;
pub mod components;
pub mod entity;
pub mod group;
pub mod hierarchy;
pub mod math;
pub mod snapshot;
pub mod table;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Lookups that may legitimately miss return `Option` instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EcsError {
    /// A table already holds a record for this id.
    #[error("entity {id} already has a record in this table")]
    DuplicateKey { id: entity::EntityId },

    /// The requested parent is the child itself or one of its descendants.
    #[error("cannot parent {child} under {parent}: would create a cycle")]
    InvalidParent {
        child: entity::EntityId,
        parent: entity::EntityId,
    },

    /// A hierarchy operation named an entity without a transform.
    #[error("entity {id} has no transform")]
    MissingTransform { id: entity::EntityId },

    /// The id does not name a live entity.
    #[error("entity {id} does not exist")]
    UnknownEntity { id: entity::EntityId },

    /// The animator has no clip registered under this name.
    #[error("entity {entity} has no animation named '{name}'")]
    AnimationNotFound {
        entity: entity::EntityId,
        name: String,
    },

    /// An external collaborator (physics, renderer) could not provide a
    /// resource for the entity.
    #[error("resource unavailable for entity {entity}: {reason}")]
    ResourceUnavailable {
        entity: entity::EntityId,
        reason: String,
    },

    /// An asset lookup by name failed where no substitute is allowed.
    #[error("unknown {kind} asset '{name}'")]
    UnknownAsset { kind: &'static str, name: String },

    /// A snapshot is internally inconsistent.
    #[error("invalid snapshot: {details}")]
    SnapshotInvalid { details: String },

    /// The transform is still linked into the hierarchy.
    #[error("transform of entity {id} still has a parent or children")]
    TransformInUse { id: entity::EntityId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::asset::{
        Animation, AnimationChannel, AssetLibrary, Material, Mesh, PositionKey, RotationKey,
    };
    pub use crate::components::{
        Animator, BodyHandle, Camera, ColliderShape, Entity, MaterialSlot, MeshRenderer,
        MotionType, PhysicsLayer, Player, PointLight, RigidBody, ShadowMapHandle, SpotLight,
        Transform,
    };
    pub use crate::entity::{EntityId, IdentityAllocator};
    pub use crate::group::{
        Component, EntityGroup, EntityOptions, MutableComponent, NoHooks, ResourceHooks,
    };
    pub use crate::math::{Mat4, Quat, Vec3};
    pub use crate::snapshot::GroupSnapshot;
    pub use crate::table::ComponentTable;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
