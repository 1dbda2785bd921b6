//! rapier3d physics bridge.
//!
//! The [`PhysicsWorld`] owns a rapier3d simulation and exchanges pose data
//! with an [`EntityGroup`]. Per frame:
//!
//! 1. Kinematic bodies are pushed from their entity's world pose.
//! 2. The [`FixedStepper`] decides how many fixed steps the frame's time
//!    buys; each step keeps the previous and current pose of every dynamic
//!    body.
//! 3. Dynamic bodies (the moving set) are written back through
//!    [`EntityGroup::set_position`] / [`EntityGroup::set_rotation`], blended
//!    between the last two physics states by the accumulator fraction.
//!
//! Bodies are created and removed through the [`ResourceHooks`]
//! implementation, so copying or destroying an entity keeps rapier in sync.
//!
//! # Determinism
//!
//! rapier3d is compiled with `enhanced-determinism`. Bodies are tracked in
//! a `BTreeMap` keyed by entity id and collision pairs are sorted, so
//! iteration never depends on hash order.

use std::collections::{BTreeMap, HashMap};

use ferrule_ecs::components::{BodyHandle, ColliderShape, MotionType, PhysicsLayer, RigidBody};
use ferrule_ecs::entity::EntityId;
use ferrule_ecs::group::{EntityGroup, ResourceHooks};
use ferrule_ecs::EcsError;
use glam::{Quat, Vec3};
use rapier3d::na;
use rapier3d::prelude::*;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// Pose conversion
// ---------------------------------------------------------------------------

/// A world-space position and rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Blend toward `other`: lerp for position, slerp for rotation.
    pub fn interpolate(&self, other: &Pose, alpha: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, alpha),
            rotation: self.rotation.slerp(other.rotation, alpha).normalize(),
        }
    }

    fn to_isometry(self) -> Isometry<Real> {
        let p = self.position;
        let r = self.rotation.normalize();
        Isometry::from_parts(
            na::Translation3::new(p.x, p.y, p.z),
            na::UnitQuaternion::from_quaternion(na::Quaternion::new(r.w, r.x, r.y, r.z)),
        )
    }

    fn from_body(rb: &rapier3d::dynamics::RigidBody) -> Pose {
        let t = rb.translation();
        let q = rb.rotation().coords;
        Pose {
            position: Vec3::new(t.x, t.y, t.z),
            rotation: Quat::from_xyzw(q.x, q.y, q.z, q.w),
        }
    }
}

fn shared_shape(shape: &ColliderShape) -> SharedShape {
    match *shape {
        ColliderShape::Box { half_extents: h } => SharedShape::cuboid(h.x, h.y, h.z),
        ColliderShape::Sphere { radius } => SharedShape::ball(radius),
        ColliderShape::Capsule {
            half_height,
            radius,
        } => SharedShape::capsule_y(half_height, radius),
        ColliderShape::Cylinder {
            half_height,
            radius,
        } => SharedShape::cylinder(half_height, radius),
    }
}

/// Moving bodies collide with everything; non-moving bodies only with
/// moving ones.
fn interaction_groups(layer: PhysicsLayer) -> InteractionGroups {
    match layer {
        PhysicsLayer::Moving => InteractionGroups::new(Group::GROUP_1, Group::ALL),
        PhysicsLayer::NonMoving => InteractionGroups::new(Group::GROUP_2, Group::GROUP_1),
    }
}

fn pack_handle(handle: RigidBodyHandle) -> BodyHandle {
    let (index, generation) = handle.into_raw_parts();
    BodyHandle((u64::from(generation) << 32) | u64::from(index))
}

// ---------------------------------------------------------------------------
// FixedStepper
// ---------------------------------------------------------------------------

/// Fixed-timestep accumulator.
///
/// Frame time is added to the accumulator; each whole `fixed_dt` in it buys
/// one physics step, up to `max_substeps` per frame. Time left over after
/// the cap is dropped. [`alpha`](Self::alpha) is the fraction of a step
/// still in the accumulator.
#[derive(Debug, Clone)]
pub struct FixedStepper {
    fixed_dt: f32,
    max_substeps: u32,
    accumulator: f32,
}

impl FixedStepper {
    /// # Panics
    ///
    /// Panics if `fixed_dt` is not positive and finite or `max_substeps`
    /// is zero.
    pub fn new(fixed_dt: f32, max_substeps: u32) -> Self {
        assert!(
            fixed_dt > 0.0 && fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {fixed_dt}"
        );
        assert!(max_substeps > 0, "max_substeps must be at least 1");
        Self {
            fixed_dt,
            max_substeps,
            accumulator: 0.0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fixed_dt, config.max_substeps)
    }

    /// Add `frame_dt` and return the number of fixed steps to run now.
    /// Negative or non-finite frame times add nothing.
    pub fn advance(&mut self, frame_dt: f32) -> u32 {
        if frame_dt.is_finite() && frame_dt > 0.0 {
            self.accumulator += frame_dt;
        }
        let mut steps = 0;
        while self.accumulator >= self.fixed_dt && steps < self.max_substeps {
            self.accumulator -= self.fixed_dt;
            steps += 1;
        }
        if self.accumulator >= self.fixed_dt {
            let dropped = self.accumulator - self.accumulator % self.fixed_dt;
            tracing::debug!(dropped_seconds = dropped, "physics backlog over max_substeps -- dropped");
            self.accumulator %= self.fixed_dt;
        }
        steps
    }

    /// Interpolation weight in `[0, 1)`.
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.fixed_dt).clamp(0.0, 1.0)
    }

    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

// ---------------------------------------------------------------------------
// CollisionPair
// ---------------------------------------------------------------------------

/// Two entities whose colliders started touching during a step.
/// `entity_a` is always the smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollisionPair {
    pub entity_a: EntityId,
    pub entity_b: EntityId,
}

// ---------------------------------------------------------------------------
// PhysicsWorld
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct BodyRecord {
    handle: RigidBodyHandle,
    motion: MotionType,
    previous: Pose,
    current: Pose,
}

/// rapier3d simulation state plus the entity <-> body mapping.
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    bodies: BTreeMap<EntityId, BodyRecord>,
    collider_to_entity: HashMap<ColliderHandle, EntityId>,
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("gravity", &self.gravity)
            .field("bodies", &self.bodies.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![gravity.x, gravity.y, gravity.z],
            integration_params: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies: BTreeMap::new(),
            collider_to_entity: HashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Vec3::from_array(config.gravity))
    }

    // -- body lifecycle -----------------------------------------------------

    /// Create the rapier body and collider for `entity` at `pose`, storing
    /// the handle in `body`. Replaces any body the entity already had.
    ///
    /// # Errors
    ///
    /// [`EcsError::ResourceUnavailable`] if the shape has a zero, negative or
    /// non-finite dimension.
    pub fn create_body(&mut self, entity: EntityId, body: &mut RigidBody, pose: Pose) -> Result<(), EcsError> {
        if !body.shape.is_valid() {
            return Err(EcsError::ResourceUnavailable {
                entity,
                reason: format!("invalid collider shape {:?}", body.shape),
            });
        }
        self.remove_body(entity);

        let builder = match body.motion {
            MotionType::Static => RigidBodyBuilder::fixed(),
            MotionType::Kinematic => RigidBodyBuilder::kinematic_position_based(),
            MotionType::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let handle = self
            .rigid_body_set
            .insert(builder.position(pose.to_isometry()).build());

        let collider = ColliderBuilder::new(shared_shape(&body.shape))
            .friction(body.friction)
            .restitution(body.restitution)
            .collision_groups(interaction_groups(body.layer))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        self.collider_to_entity.insert(collider_handle, entity);

        self.bodies.insert(
            entity,
            BodyRecord {
                handle,
                motion: body.motion,
                previous: pose,
                current: pose,
            },
        );
        body.body = Some(pack_handle(handle));
        tracing::debug!(entity = %entity, motion = ?body.motion, layer = ?body.layer, "rigid body registered");
        Ok(())
    }

    /// Create the body for an entity's [`RigidBody`] component at its
    /// current world pose.
    ///
    /// # Errors
    ///
    /// [`EcsError::ResourceUnavailable`] if the entity has no rigid body or
    /// the shape is invalid.
    pub fn register_rigid_body(&mut self, group: &mut EntityGroup, id: EntityId) -> Result<(), EcsError> {
        let pose = Pose {
            position: group.position(id).unwrap_or(Vec3::ZERO),
            rotation: group.rotation(id).unwrap_or(Quat::IDENTITY),
        };
        let body = group
            .get_mut::<RigidBody>(id)
            .ok_or_else(|| EcsError::ResourceUnavailable {
                entity: id,
                reason: "entity has no rigid body component".to_owned(),
            })?;
        self.create_body(id, body, pose)
    }

    /// Register every rigid body in `group` that has no physics body yet,
    /// in id order. Returns how many were created.
    ///
    /// # Errors
    ///
    /// Stops at the first invalid shape.
    pub fn register_all(&mut self, group: &mut EntityGroup) -> Result<usize, EcsError> {
        let mut pending: Vec<EntityId> = group
            .iter::<RigidBody>()
            .filter(|(id, body)| body.body.is_none() || !self.bodies.contains_key(id))
            .map(|(id, _)| id)
            .collect();
        pending.sort_unstable();
        for &id in &pending {
            self.register_rigid_body(group, id)?;
        }
        Ok(pending.len())
    }

    /// Remove `entity`'s body and colliders. Returns `false` if it had none.
    pub fn remove_body(&mut self, entity: EntityId) -> bool {
        let Some(record) = self.bodies.remove(&entity) else {
            return false;
        };
        self.rigid_body_set.remove(
            record.handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        self.collider_to_entity.retain(|_, e| *e != entity);
        tracing::debug!(entity = %entity, "rigid body removed");
        true
    }

    /// Remove bodies whose entity no longer exists or no longer carries a
    /// rigid body. Returns how many were removed.
    pub fn prune(&mut self, group: &EntityGroup) -> usize {
        let stale: Vec<EntityId> = self
            .bodies
            .keys()
            .copied()
            .filter(|&e| !group.has::<RigidBody>(e))
            .collect();
        for &entity in &stale {
            self.remove_body(entity);
        }
        stale.len()
    }

    /// Drop every body and reset the simulation state.
    pub fn clear(&mut self) {
        let gravity = Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z);
        *self = Self::new(gravity);
    }

    /// Clear, then register every rigid body in `group`.
    ///
    /// # Errors
    ///
    /// As [`register_all`](Self::register_all).
    pub fn rebuild_from(&mut self, group: &mut EntityGroup) -> Result<usize, EcsError> {
        self.clear();
        let ids: Vec<EntityId> = group.iter::<RigidBody>().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(body) = group.get_mut::<RigidBody>(id) {
                body.body = None;
            }
        }
        self.register_all(group)
    }

    // -- stepping -----------------------------------------------------------

    /// Feed the world pose of every kinematic body's entity to rapier as the
    /// target of the next step.
    pub fn push_kinematic(&mut self, group: &EntityGroup) {
        for (&entity, record) in &self.bodies {
            if record.motion != MotionType::Kinematic {
                continue;
            }
            let (Some(position), Some(rotation)) = (group.position(entity), group.rotation(entity))
            else {
                continue;
            };
            if let Some(rb) = self.rigid_body_set.get_mut(record.handle) {
                rb.set_next_kinematic_position(Pose { position, rotation }.to_isometry());
            }
        }
    }

    /// Run one simulation step of `dt` seconds. Dynamic bodies shift their
    /// current pose to previous and read the new one. Returns the collision
    /// pairs that started during the step, sorted.
    pub fn step(&mut self, dt: f32) -> Vec<CollisionPair> {
        self.integration_params.dt = dt;

        let (collision_send, collision_recv) =
            rapier3d::crossbeam::channel::unbounded::<CollisionEvent>();
        let (force_send, _force_recv) =
            rapier3d::crossbeam::channel::unbounded::<ContactForceEvent>();
        let event_handler = ChannelEventCollector::new(collision_send, force_send);

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &event_handler,
        );

        for record in self.bodies.values_mut() {
            if record.motion != MotionType::Dynamic {
                continue;
            }
            if let Some(rb) = self.rigid_body_set.get(record.handle) {
                record.previous = record.current;
                record.current = Pose::from_body(rb);
            }
        }

        let mut collisions = Vec::new();
        while let Ok(event) = collision_recv.try_recv() {
            if let CollisionEvent::Started(h1, h2, _flags) = event {
                let a = self.collider_to_entity.get(&h1).copied();
                let b = self.collider_to_entity.get(&h2).copied();
                if let (Some(a), Some(b)) = (a, b) {
                    collisions.push(CollisionPair {
                        entity_a: a.min(b),
                        entity_b: a.max(b),
                    });
                }
            }
        }
        collisions.sort_unstable();
        collisions
    }

    /// Write every dynamic body's pose into its entity, blended between the
    /// last two physics states by `alpha` (1.0 = latest state). Returns the
    /// number of entities written.
    pub fn interpolate(&self, group: &mut EntityGroup, alpha: f32) -> usize {
        let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 1.0 };
        let mut written = 0;
        for (&entity, record) in &self.bodies {
            if record.motion != MotionType::Dynamic {
                continue;
            }
            let pose = record.previous.interpolate(&record.current, alpha);
            if group.set_position(entity, pose.position).is_ok()
                && group.set_rotation(entity, pose.rotation).is_ok()
            {
                written += 1;
            }
        }
        written
    }

    // -- accessors ----------------------------------------------------------

    /// Latest simulated pose of `entity`'s body.
    pub fn body_pose(&self, entity: EntityId) -> Option<Pose> {
        let record = self.bodies.get(&entity)?;
        self.rigid_body_set.get(record.handle).map(Pose::from_body)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.bodies.contains_key(&entity)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Entities whose pose the simulation drives, in id order.
    pub fn moving_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.bodies
            .iter()
            .filter(|(_, r)| r.motion == MotionType::Dynamic)
            .map(|(&e, _)| e)
    }

    /// Set a dynamic body's linear velocity.
    pub fn set_linear_velocity(&mut self, entity: EntityId, velocity: Vec3) -> bool {
        let Some(record) = self.bodies.get(&entity) else {
            return false;
        };
        match self.rigid_body_set.get_mut(record.handle) {
            Some(rb) => {
                rb.set_linvel(vector![velocity.x, velocity.y, velocity.z], true);
                true
            }
            None => false,
        }
    }
}

impl ResourceHooks for PhysicsWorld {
    fn attach_rigid_body(
        &mut self,
        entity: EntityId,
        body: &mut RigidBody,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), EcsError> {
        self.create_body(entity, body, Pose { position, rotation })
    }

    fn detach_rigid_body(&mut self, entity: EntityId, _body: &RigidBody) {
        self.remove_body(entity);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_at(group: &mut EntityGroup, y: f32) -> EntityId {
        let e = group.create_entity("ball");
        group.set_local_position(e, Vec3::new(0.0, y, 0.0)).unwrap();
        group
            .insert(e, RigidBody::new(ColliderShape::Sphere { radius: 0.5 }, MotionType::Dynamic))
            .unwrap();
        e
    }

    // -- FixedStepper -------------------------------------------------------

    #[test]
    fn stepper_counts_whole_steps() {
        let mut stepper = FixedStepper::new(0.01, 8);
        assert_eq!(stepper.advance(0.025), 2);
        assert!((stepper.alpha() - 0.5).abs() < 1e-3);
        assert_eq!(stepper.advance(0.004), 0);
        assert_eq!(stepper.advance(0.002), 1);
    }

    #[test]
    fn stepper_caps_substeps_and_drops_backlog() {
        let mut stepper = FixedStepper::new(0.01, 4);
        assert_eq!(stepper.advance(1.0), 4);
        assert!(stepper.accumulator() < 0.01);
        assert_eq!(stepper.advance(-1.0), 0);
        assert_eq!(stepper.advance(f32::NAN), 0);
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn stepper_rejects_zero_dt() {
        let _ = FixedStepper::new(0.0, 1);
    }

    // -- PhysicsWorld -------------------------------------------------------

    #[test]
    fn register_sets_handle() {
        let mut group = EntityGroup::new();
        let ball = ball_at(&mut group, 5.0);
        let mut physics = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        physics.register_rigid_body(&mut group, ball).unwrap();
        assert!(physics.contains(ball));
        assert!(group.get::<RigidBody>(ball).unwrap().body.is_some());
        let pose = physics.body_pose(ball).unwrap();
        assert!((pose.position.y - 5.0).abs() < 1e-5);
    }

    #[test]
    fn invalid_shape_is_rejected() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("bad");
        group
            .insert(e, RigidBody::new(ColliderShape::Sphere { radius: 0.0 }, MotionType::Dynamic))
            .unwrap();
        let mut physics = PhysicsWorld::new(Vec3::ZERO);
        let err = physics.register_rigid_body(&mut group, e).unwrap_err();
        assert!(matches!(err, EcsError::ResourceUnavailable { .. }));
        assert_eq!(physics.body_count(), 0);
    }

    #[test]
    fn gravity_pulls_dynamic_bodies_down() {
        let mut group = EntityGroup::new();
        let ball = ball_at(&mut group, 10.0);
        let mut physics = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        physics.register_all(&mut group).unwrap();
        for _ in 0..30 {
            physics.step(1.0 / 60.0);
        }
        assert_eq!(physics.interpolate(&mut group, 1.0), 1);
        assert!(group.position(ball).unwrap().y < 10.0);
    }

    #[test]
    fn interpolation_blends_previous_and_current() {
        let mut group = EntityGroup::new();
        let ball = ball_at(&mut group, 10.0);
        let mut physics = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        physics.register_all(&mut group).unwrap();
        physics.step(0.1);
        let latest = physics.body_pose(ball).unwrap().position.y;
        physics.interpolate(&mut group, 0.5);
        let halfway = group.position(ball).unwrap().y;
        assert!(halfway < 10.0 && halfway > latest, "{halfway} vs {latest}");
    }

    #[test]
    fn destroy_through_hooks_removes_body() {
        let mut group = EntityGroup::new();
        let ball = ball_at(&mut group, 1.0);
        let mut physics = PhysicsWorld::new(Vec3::ZERO);
        physics.register_all(&mut group).unwrap();
        assert!(group.destroy_entity_with(ball, &mut physics));
        assert_eq!(physics.body_count(), 0);
    }

    #[test]
    fn layers_filter_static_pairs() {
        let moving = interaction_groups(PhysicsLayer::Moving);
        let still = interaction_groups(PhysicsLayer::NonMoving);
        assert!(moving.test(still));
        assert!(moving.test(moving));
        assert!(!still.test(still));
    }
}
