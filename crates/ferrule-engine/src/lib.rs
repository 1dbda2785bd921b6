//! Ferrule Engine -- frame loop, animation, copying and physics on top of
//! [`ferrule_ecs`].
//!
//! The ECS crate holds the data: entities, component tables and the
//! transform hierarchy. This crate holds the systems that act on it each
//! frame: the [`AnimationSampler`](animation::AnimationSampler), the
//! rapier3d-backed [`PhysicsWorld`](physics::PhysicsWorld) with its
//! fixed-timestep accumulator, renderer extraction, and the
//! [`EntityCopier`](copier::EntityCopier) used to instantiate prefabs.
//! [`FrameLoop`](tick::FrameLoop) ties them together.
//!
//! # Quick Start
//!
//! ```
//! use ferrule_engine::prelude::*;
//!
//! let mut group = EntityGroup::new();
//! let ball = group.create_entity("ball");
//! group.set_local_position(ball, Vec3::new(0.0, 5.0, 0.0)).unwrap();
//! group
//!     .insert(ball, RigidBody::new(ColliderShape::Sphere { radius: 0.5 }, MotionType::Dynamic))
//!     .unwrap();
//!
//! let mut frames = FrameLoop::new(group, EngineConfig::default());
//! frames.run_frames(60, 1.0 / 60.0);
//!
//! assert!(frames.group().position(ball).unwrap().y < 5.0);
//! ```

#![deny(unsafe_code)]

pub mod animation;
pub mod config;
pub mod copier;
pub mod physics;
pub mod render;
pub mod snapshot;
pub mod tick;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use ferrule_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use ferrule_ecs::prelude::*;

    pub use crate::animation::{
        bind_channels, current_animation, play_animation, AnimationSampler, SampleReport,
    };
    pub use crate::config::EngineConfig;
    pub use crate::copier::{copy_entity, duplicate_entity, EntityCopier, SubtreeTemplate};
    pub use crate::physics::{CollisionPair, FixedStepper, PhysicsWorld, Pose};
    pub use crate::render::{
        active_camera, collect_draw_items, collect_lights, CameraView, DrawItem, LightKind,
        LightSnapshot,
    };
    pub use crate::snapshot::EngineSnapshot;
    pub use crate::tick::{FrameDiagnostics, FrameLoop, SystemFn};
}
