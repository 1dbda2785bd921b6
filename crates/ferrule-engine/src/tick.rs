//! Variable-rate frame loop over a fixed-timestep physics simulation.
//!
//! The [`FrameLoop`] owns an [`EntityGroup`] and the collaborators that act
//! on it. Each call to [`FrameLoop::frame`]:
//!
//! 1. Runs every registered system in registration order.
//! 2. Samples animations.
//! 3. Syncs physics bodies: removes bodies of destroyed entities and
//!    registers rigid bodies added since the last frame.
//! 4. Pushes kinematic poses and runs as many fixed physics steps as the
//!    accumulated time allows.
//! 5. Writes moving-body poses back, blended by the accumulator fraction
//!    when interpolation is enabled.
//!
//! # Example
//!
//! ```
//! use ferrule_engine::config::EngineConfig;
//! use ferrule_engine::tick::FrameLoop;
//! use ferrule_ecs::prelude::*;
//!
//! let mut frames = FrameLoop::new(EntityGroup::new(), EngineConfig::default());
//! frames.add_system("spin", |group, dt| {
//!     for id in group.roots() {
//!         let r = group.local_rotation(id).unwrap_or(Quat::IDENTITY);
//!         let _ = group.set_local_rotation(id, r * Quat::from_rotation_y(dt));
//!     }
//! });
//!
//! for _ in 0..10 {
//!     frames.frame(1.0 / 60.0);
//! }
//! assert_eq!(frames.frame_count(), 10);
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ferrule_ecs::components::RigidBody;
use ferrule_ecs::entity::EntityId;
use ferrule_ecs::group::EntityGroup;

use crate::animation::{AnimationSampler, SampleReport};
use crate::config::EngineConfig;
use crate::copier::{duplicate_entity, SubtreeTemplate};
use crate::physics::{CollisionPair, FixedStepper, PhysicsWorld};

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing and counters for the last frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
    pub animation_time: Duration,
    /// Body sync, stepping and write-back.
    pub physics_time: Duration,
    /// Fixed steps run this frame.
    pub physics_steps: u32,
    /// Collision pairs that started during this frame's steps.
    pub collisions: Vec<CollisionPair>,
    pub sampling: SampleReport,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// SystemFn
// ---------------------------------------------------------------------------

/// A per-frame system. Receives the group and the frame's `dt` in seconds.
pub type SystemFn = fn(&mut EntityGroup, f32);

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

/// Drives an [`EntityGroup`] one rendered frame at a time.
#[derive(Debug)]
pub struct FrameLoop {
    pub(crate) group: EntityGroup,
    pub(crate) physics: PhysicsWorld,
    pub(crate) config: EngineConfig,
    pub(crate) stepper: FixedStepper,
    sampler: AnimationSampler,
    systems: Vec<RegisteredSystem>,
    pub(crate) frame_counter: u64,
    pub(crate) step_counter: u64,
    /// Rigid bodies that failed to register, as they were when rejected.
    /// Retried once the component changes; dropped once it is gone.
    pub(crate) rejected_bodies: BTreeMap<EntityId, RigidBody>,
    last_diagnostics: FrameDiagnostics,
}

impl FrameLoop {
    /// Take ownership of `group` and register its rigid bodies.
    ///
    /// Rigid bodies with invalid shapes are skipped with a warning.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`EngineConfig::validate`].
    pub fn new(group: EntityGroup, config: EngineConfig) -> Self {
        if let Err(err) = config.validate() {
            panic!("invalid engine config: {err}");
        }
        let mut frames = Self {
            group,
            physics: PhysicsWorld::from_config(&config),
            stepper: FixedStepper::from_config(&config),
            config,
            sampler: AnimationSampler::new(),
            systems: Vec::new(),
            frame_counter: 0,
            step_counter: 0,
            rejected_bodies: BTreeMap::new(),
            last_diagnostics: FrameDiagnostics::default(),
        };
        frames.sync_bodies();
        frames
    }

    /// Register a system to run each frame, after those already registered.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system(&mut self, name: &str, func: SystemFn) {
        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
    }

    /// Advance one rendered frame of `dt` seconds.
    pub fn frame(&mut self, dt: f32) -> &FrameDiagnostics {
        let _span = tracing::debug_span!("frame", frame = self.frame_counter).entered();
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let frame_start = Instant::now();

        let mut system_times = Vec::with_capacity(self.systems.len());
        for system in &self.systems {
            let start = Instant::now();
            (system.func)(&mut self.group, dt);
            system_times.push((system.name.clone(), start.elapsed()));
        }

        let animation_start = Instant::now();
        let sampling = {
            let _span = tracing::trace_span!("animation").entered();
            self.sampler.sample(&mut self.group, dt)
        };
        let animation_time = animation_start.elapsed();

        let physics_start = Instant::now();
        let (physics_steps, collisions) = {
            let _span = tracing::trace_span!("physics").entered();
            self.sync_bodies();
            let steps = self.stepper.advance(dt);
            let mut collisions = Vec::new();
            for _ in 0..steps {
                self.physics.push_kinematic(&self.group);
                collisions.extend(self.physics.step(self.stepper.fixed_dt()));
            }
            self.step_counter += u64::from(steps);
            let alpha = if self.config.interpolate {
                self.stepper.alpha()
            } else {
                1.0
            };
            if steps > 0 || self.config.interpolate {
                self.physics.interpolate(&mut self.group, alpha);
            }
            (steps, collisions)
        };
        let physics_time = physics_start.elapsed();

        self.frame_counter += 1;
        if !collisions.is_empty() {
            tracing::trace!(count = collisions.len(), "collisions this frame");
        }

        self.last_diagnostics = FrameDiagnostics {
            system_times,
            animation_time,
            physics_time,
            physics_steps,
            collisions,
            sampling,
            total_time: frame_start.elapsed(),
        };
        &self.last_diagnostics
    }

    /// Run `count` frames of `dt` seconds each. Returns the number of
    /// physics steps taken.
    pub fn run_frames(&mut self, count: u64, dt: f32) -> u64 {
        let mut steps = 0u64;
        for _ in 0..count {
            steps += u64::from(self.frame(dt).physics_steps);
        }
        steps
    }

    pub(crate) fn sync_bodies(&mut self) {
        self.physics.prune(&self.group);
        let group = &self.group;
        self.rejected_bodies
            .retain(|&id, rejected| group.get::<RigidBody>(id) == Some(&*rejected));

        // Register one at a time so a single bad shape does not block the rest.
        let pending: Vec<EntityId> = self
            .group
            .iter::<RigidBody>()
            .filter(|(id, _)| !self.physics.contains(*id) && !self.rejected_bodies.contains_key(id))
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            if let Err(err) = self.physics.register_rigid_body(&mut self.group, id) {
                tracing::warn!(entity = %id, error = %err, "rigid body not registered -- skipping");
                if let Some(body) = self.group.get::<RigidBody>(id) {
                    self.rejected_bodies.insert(id, body.clone());
                }
            }
        }
    }

    // -- entity lifecycle through the engine's hooks -------------------------

    /// Destroy `id` and its subtree, removing their physics bodies.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        self.group.destroy_entity_with(id, &mut self.physics)
    }

    /// Clone `template` into this loop's group under `parent`
    /// ([`EntityId::INVALID`] for a root), creating physics bodies for the
    /// copies.
    ///
    /// # Errors
    ///
    /// As [`SubtreeTemplate::instantiate`]; nothing is left behind on error.
    pub fn instantiate(
        &mut self,
        template: &SubtreeTemplate,
        parent: EntityId,
    ) -> Result<EntityId, ferrule_ecs::EcsError> {
        template.instantiate(&mut self.group, parent, &mut self.physics)
    }

    /// Clone the subtree rooted at `source` within this loop's group.
    ///
    /// # Errors
    ///
    /// As [`duplicate_entity`].
    pub fn duplicate(&mut self, source: EntityId, parent: EntityId) -> Result<EntityId, ferrule_ecs::EcsError> {
        duplicate_entity(&mut self.group, source, parent, &mut self.physics)
    }

    // -- accessors ----------------------------------------------------------

    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    /// Physics steps taken since construction or the last restore.
    pub fn step_count(&self) -> u64 {
        self.step_counter
    }

    /// Simulated time in seconds, `step_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.step_counter as f64 * f64::from(self.config.fixed_dt)
    }

    pub fn group(&self) -> &EntityGroup {
        &self.group
    }

    /// Mutable access to the group. Destroying entities here bypasses the
    /// physics hooks; stale bodies are pruned at the next frame.
    pub fn group_mut(&mut self) -> &mut EntityGroup {
        &mut self.group
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.physics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// System names in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
