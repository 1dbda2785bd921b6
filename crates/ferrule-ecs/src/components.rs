//! Component records stored in an [`EntityGroup`](crate::group::EntityGroup).
//!
//! Every record is keyed by its owning entity's id in a
//! [`ComponentTable`](crate::table::ComponentTable). Records refer to other
//! entities by [`EntityId`] only, never by reference, so table compaction can
//! never invalidate them. Shared assets are held through [`Arc`]s and are
//! never duplicated when a record is cloned.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::asset::{Animation, Material, Mesh};
use crate::entity::EntityId;
use crate::math;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The entity record itself: display name and active flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Display name; not required to be unique.
    pub name: String,
    /// Inactive entities (and their descendants) are skipped by renderer
    /// extraction.
    pub active: bool,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Local transform state plus the cached world matrix and hierarchy links.
///
/// Fields are private: every write must go through the hierarchy operations
/// on [`EntityGroup`](crate::group::EntityGroup) so that the cached world
/// matrix and the parent/child links stay consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub(crate) parent: EntityId,
    pub(crate) position: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) scale: Vec3,
    pub(crate) world: Mat4,
    /// Insertion order; only used for traversal.
    pub(crate) children: Vec<EntityId>,
}

impl Transform {
    /// Identity transform with no parent.
    pub const IDENTITY: Self = Self {
        parent: EntityId::INVALID,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
        world: Mat4::IDENTITY,
        children: Vec::new(),
    };

    /// A root transform with the given local fields.
    pub fn from_parts(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            world: math::compose(position, rotation, scale),
            ..Self::IDENTITY
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::from_parts(position, Quat::IDENTITY, Vec3::ONE)
    }

    /// Parent id, or [`EntityId::INVALID`] for a root.
    #[inline]
    pub fn parent(&self) -> EntityId {
        self.parent
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        !self.parent.is_valid()
    }

    #[inline]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    #[inline]
    pub fn local_position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn local_rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn local_scale(&self) -> Vec3 {
        self.scale
    }

    /// Local matrix composed from position, rotation and scale.
    #[inline]
    pub fn local_matrix(&self) -> Mat4 {
        math::compose(self.position, self.rotation, self.scale)
    }

    /// Cached world matrix, valid after every hierarchy operation returns.
    #[inline]
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// MeshRenderer
// ---------------------------------------------------------------------------

/// A material bound to one submesh.
#[derive(Debug, Clone)]
pub struct MaterialSlot {
    /// Submesh index this slot applies to.
    pub submesh: u32,
    /// Shared material asset.
    pub material: Arc<Material>,
}

/// Draws a shared mesh with one material per submesh.
#[derive(Debug, Clone)]
pub struct MeshRenderer {
    /// Shared mesh asset.
    pub mesh: Arc<Mesh>,
    /// Per-submesh material bindings; unbound submeshes use the default
    /// material.
    pub materials: Vec<MaterialSlot>,
    /// Root of the skeleton this mesh is skinned to (often the entity's
    /// model root). [`EntityId::INVALID`] for static meshes.
    pub root_entity: EntityId,
    /// Joint entities, in the mesh's bone order.
    pub bones: Vec<EntityId>,
    /// Whether the mesh is drawn into shadow maps.
    pub cast_shadows: bool,
}

impl MeshRenderer {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            materials: Vec::new(),
            root_entity: EntityId::INVALID,
            bones: Vec::new(),
            cast_shadows: true,
        }
    }

    /// Builder-style material binding.
    pub fn with_material(mut self, submesh: u32, material: Arc<Material>) -> Self {
        self.materials.push(MaterialSlot { submesh, material });
        self
    }

    /// Material bound to `submesh`, if any.
    pub fn material_for(&self, submesh: u32) -> Option<&Arc<Material>> {
        self.materials
            .iter()
            .find(|slot| slot.submesh == submesh)
            .map(|slot| &slot.material)
    }
}

// ---------------------------------------------------------------------------
// Animator
// ---------------------------------------------------------------------------

/// Playback state for skeletal animation.
///
/// Cursors and channel targets are indexed in the order of the current
/// clip's channels.
#[derive(Debug, Clone)]
pub struct Animator {
    /// Clips this animator can play, by name.
    pub animations: HashMap<String, Arc<Animation>>,
    /// Clip being played, if any.
    pub current: Option<Arc<Animation>>,
    /// Playback time in seconds within the current clip.
    pub time: f32,
    /// Playback speed multiplier.
    pub speed: f32,
    /// `false` while paused or stopped.
    pub playing: bool,
    /// Next position keyframe per channel.
    pub position_cursors: Vec<usize>,
    /// Next rotation keyframe per channel.
    pub rotation_cursors: Vec<usize>,
    /// Channel index -> entity whose transform receives the sampled pose.
    pub channel_targets: Vec<EntityId>,
    /// Entity under which channel targets are resolved by name.
    pub root_entity: EntityId,
}

impl Animator {
    pub fn new() -> Self {
        Self {
            animations: HashMap::new(),
            current: None,
            time: 0.0,
            speed: 1.0,
            playing: true,
            position_cursors: Vec::new(),
            rotation_cursors: Vec::new(),
            channel_targets: Vec::new(),
            root_entity: EntityId::INVALID,
        }
    }

    /// Register a clip under its own name.
    pub fn with_animation(mut self, animation: Arc<Animation>) -> Self {
        self.add_animation(animation);
        self
    }

    pub fn add_animation(&mut self, animation: Arc<Animation>) {
        self.animations.insert(animation.name.clone(), animation);
    }

    /// Name of the clip currently playing.
    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref().map(|clip| clip.name.as_str())
    }

    /// Switch to the clip registered as `name`, resetting playback time and
    /// every cursor to zero. Channel targets are left for the caller to bind.
    ///
    /// # Errors
    ///
    /// [`EcsError::AnimationNotFound`] if no clip is registered as `name`.
    /// The animator is unchanged in that case.
    pub fn play(&mut self, entity: EntityId, name: &str) -> Result<(), EcsError> {
        let clip = self
            .animations
            .get(name)
            .cloned()
            .ok_or_else(|| EcsError::AnimationNotFound {
                entity,
                name: name.to_owned(),
            })?;
        let channels = clip.channels.len();
        self.current = Some(clip);
        self.time = 0.0;
        self.playing = true;
        self.position_cursors = vec![0; channels];
        self.rotation_cursors = vec![0; channels];
        self.channel_targets
            .resize(channels, EntityId::INVALID);
        Ok(())
    }

    /// Reset time and cursors without changing the clip.
    pub fn rewind(&mut self) {
        self.time = 0.0;
        self.position_cursors.iter_mut().for_each(|c| *c = 0);
        self.rotation_cursors.iter_mut().for_each(|c| *c = 0);
    }

    /// Freeze playback at the current time.
    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn resume(&mut self) {
        self.playing = true;
    }

    /// Stop playback and clear the current clip.
    pub fn stop(&mut self) {
        self.current = None;
        self.time = 0.0;
        self.position_cursors.clear();
        self.rotation_cursors.clear();
    }
}

impl Default for Animator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RigidBody
// ---------------------------------------------------------------------------

/// Collision shape handed to the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
}

impl ColliderShape {
    /// Whether every dimension is positive and finite.
    pub fn is_valid(&self) -> bool {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        match *self {
            ColliderShape::Box { half_extents } => {
                positive(half_extents.x) && positive(half_extents.y) && positive(half_extents.z)
            }
            ColliderShape::Sphere { radius } => positive(radius),
            ColliderShape::Capsule {
                half_height,
                radius,
            }
            | ColliderShape::Cylinder {
                half_height,
                radius,
            } => positive(half_height) && positive(radius),
        }
    }
}

/// How the physics engine moves a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionType {
    /// Never moves.
    Static,
    /// Moved by gameplay code; pushes dynamic bodies.
    Kinematic,
    /// Fully simulated.
    Dynamic,
}

/// Broad-phase layer. Non-moving bodies only collide with moving ones;
/// moving bodies collide with everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicsLayer {
    NonMoving,
    Moving,
}

impl PhysicsLayer {
    /// The conventional layer for a motion type.
    pub fn for_motion(motion: MotionType) -> Self {
        match motion {
            MotionType::Static => PhysicsLayer::NonMoving,
            MotionType::Kinematic | MotionType::Dynamic => PhysicsLayer::Moving,
        }
    }
}

/// Opaque handle to a body owned by the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub u64);

/// Physics body description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    /// Collider geometry, centered on the entity.
    pub shape: ColliderShape,
    /// Who drives the body's pose.
    pub motion: MotionType,
    /// Collision filter group.
    pub layer: PhysicsLayer,
    /// Coulomb friction coefficient.
    pub friction: f32,
    /// Bounciness in `[0, 1]`.
    pub restitution: f32,
    /// Set once the physics engine has created the body. Never persisted or
    /// copied: each instance gets its own body.
    #[serde(skip)]
    pub body: Option<BodyHandle>,
}

impl RigidBody {
    pub fn new(shape: ColliderShape, motion: MotionType) -> Self {
        Self {
            shape,
            motion,
            layer: PhysicsLayer::for_motion(motion),
            friction: 0.5,
            restitution: 0.0,
            body: None,
        }
    }

    /// Whether the physics engine drives this body's pose.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.motion != MotionType::Static
    }
}

// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    /// Linear RGB color.
    pub color: Vec3,
    /// Brightness multiplier applied to `color`.
    pub intensity: f32,
    /// Distance at which the light no longer contributes.
    pub range: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
        }
    }
}

/// Opaque handle to a shadow map owned by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowMapHandle(pub u64);

/// Cone light pointing down its entity's local -Z axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotLight {
    /// Linear RGB color.
    pub color: Vec3,
    /// Brightness multiplier applied to `color`.
    pub intensity: f32,
    /// Distance at which the light no longer contributes.
    pub range: f32,
    /// Half-angle of the full-intensity cone, radians.
    pub inner_angle: f32,
    /// Half-angle where intensity reaches zero, radians.
    pub outer_angle: f32,
    /// Whether the renderer allocates a shadow map for this light.
    pub casts_shadows: bool,
    /// Renderer-owned shadow resource; released through
    /// [`ResourceHooks::release_spot_light`](crate::group::ResourceHooks::release_spot_light).
    #[serde(skip)]
    pub shadow_map: Option<ShadowMapHandle>,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            range: 15.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
            casts_shadows: false,
            shadow_map: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Camera / Player
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Vertical field of view, radians.
    pub fov_y: f32,
    /// Near clip plane distance.
    pub near: f32,
    /// Far clip plane distance.
    pub far: f32,
    /// Only active cameras are considered by `active_camera`.
    pub active: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
            active: true,
        }
    }
}

impl Camera {
    /// Right-handed perspective projection for the given aspect ratio.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far)
    }
}

/// Player controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Movement speed, units per second.
    pub move_speed: f32,
    /// Radians of view rotation per unit of look input.
    pub look_sensitivity: f32,
    /// Entity carrying the camera that follows this player.
    pub camera_target: EntityId,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            look_sensitivity: 0.002,
            camera_target: EntityId::INVALID,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_resets_time_and_cursors() {
        let clip = Arc::new(Animation {
            name: "run".to_owned(),
            duration: 1.0,
            channels: vec![Default::default(), Default::default()],
        });
        let mut animator = Animator::new().with_animation(clip);
        animator.time = 0.7;
        animator.position_cursors = vec![3, 3];
        animator.play(EntityId::new(1), "run").unwrap();
        assert_eq!(animator.time, 0.0);
        assert_eq!(animator.position_cursors, vec![0, 0]);
        assert_eq!(animator.rotation_cursors, vec![0, 0]);
        assert_eq!(animator.channel_targets.len(), 2);
        assert_eq!(animator.current_name(), Some("run"));
    }

    #[test]
    fn play_unknown_clip_fails_without_change() {
        let mut animator = Animator::new();
        animator.time = 0.25;
        let err = animator.play(EntityId::new(4), "jump").unwrap_err();
        assert!(matches!(err, EcsError::AnimationNotFound { ref name, .. } if name == "jump"));
        assert_eq!(animator.time, 0.25);
        assert!(animator.current.is_none());
    }

    #[test]
    fn layer_follows_motion_type() {
        let body = RigidBody::new(ColliderShape::Sphere { radius: 1.0 }, MotionType::Static);
        assert_eq!(body.layer, PhysicsLayer::NonMoving);
        assert!(!body.is_moving());
        let body = RigidBody::new(ColliderShape::Sphere { radius: 1.0 }, MotionType::Dynamic);
        assert_eq!(body.layer, PhysicsLayer::Moving);
    }

    #[test]
    fn degenerate_shapes_are_invalid() {
        assert!(!ColliderShape::Sphere { radius: 0.0 }.is_valid());
        assert!(!ColliderShape::Box {
            half_extents: Vec3::new(1.0, -1.0, 1.0)
        }
        .is_valid());
        assert!(ColliderShape::Capsule {
            half_height: 0.5,
            radius: 0.25
        }
        .is_valid());
    }

    #[test]
    fn rigid_body_handle_is_not_serialized() {
        let mut body = RigidBody::new(ColliderShape::Sphere { radius: 1.0 }, MotionType::Dynamic);
        body.body = Some(BodyHandle(7));
        let json = serde_json::to_string(&body).unwrap();
        let back: RigidBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, None);
        assert_eq!(back.shape, body.shape);
    }
}
