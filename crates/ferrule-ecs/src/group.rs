//! The [`EntityGroup`] owns one identity allocator and one
//! [`ComponentTable`] per component kind.
//!
//! A running scene and a prefab library are each an `EntityGroup`. Groups
//! never share mutable component storage; they may share immutable assets.

use glam::{Quat, Vec3};

use crate::components::{
    Animator, Camera, Entity, MeshRenderer, Player, PointLight, RigidBody, SpotLight, Transform,
};
use crate::entity::{EntityId, IdentityAllocator};
use crate::table::ComponentTable;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component -- typed access to the group's tables
// ---------------------------------------------------------------------------

/// A record kind stored in an [`EntityGroup`].
///
/// Implemented for every component type so that callers can write
/// `group.get::<Camera>(id)` instead of naming the table.
pub trait Component: Sized + 'static {
    /// Name used in logs and snapshots.
    const NAME: &'static str;

    fn table(group: &EntityGroup) -> &ComponentTable<Self>;

    fn table_mut(group: &mut EntityGroup) -> &mut ComponentTable<Self>;
}

macro_rules! impl_component {
    ($ty:ty, $field:ident, $name:literal) => {
        impl Component for $ty {
            const NAME: &'static str = $name;

            #[inline]
            fn table(group: &EntityGroup) -> &ComponentTable<Self> {
                &group.$field
            }

            #[inline]
            fn table_mut(group: &mut EntityGroup) -> &mut ComponentTable<Self> {
                &mut group.$field
            }
        }
    };
}

impl_component!(Entity, entities, "entity");
impl_component!(Transform, transforms, "transform");
impl_component!(MeshRenderer, mesh_renderers, "mesh_renderer");
impl_component!(Animator, animators, "animator");
impl_component!(RigidBody, rigid_bodies, "rigid_body");
impl_component!(PointLight, point_lights, "point_light");
impl_component!(SpotLight, spot_lights, "spot_light");
impl_component!(Camera, cameras, "camera");
impl_component!(Player, players, "player");

// ---------------------------------------------------------------------------
// ResourceHooks -- external cleanup / construction callbacks
// ---------------------------------------------------------------------------

/// Callbacks into collaborators that own resources tied to components.
///
/// The physics bridge creates and removes bodies; the renderer releases
/// shadow maps. All methods default to no-ops so that pure data work (tests,
/// prefab libraries) can use [`NoHooks`].
pub trait ResourceHooks {
    /// Create the external body for `entity`'s rigid body at the given world
    /// pose. Called by the copier once the cloned subtree's world transforms
    /// are settled.
    ///
    /// # Errors
    ///
    /// [`EcsError::ResourceUnavailable`] if the body cannot be constructed.
    fn attach_rigid_body(
        &mut self,
        entity: EntityId,
        body: &mut RigidBody,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), EcsError> {
        let _ = (entity, body, position, rotation);
        Ok(())
    }

    /// Remove the external body. Called before the record disappears.
    fn detach_rigid_body(&mut self, entity: EntityId, body: &RigidBody) {
        let _ = (entity, body);
    }

    /// Release renderer resources held by a spot light.
    fn release_spot_light(&mut self, entity: EntityId, light: &SpotLight) {
        let _ = (entity, light);
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ResourceHooks for NoHooks {}

// ---------------------------------------------------------------------------
// EntityOptions
// ---------------------------------------------------------------------------

/// Options for [`EntityGroup::create_entity_with`].
#[derive(Debug, Clone, Copy)]
pub struct EntityOptions {
    /// Explicit id to use, or [`EntityId::INVALID`] to allocate one.
    pub id: EntityId,
    /// Whether to attach a default root [`Transform`].
    pub with_transform: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            id: EntityId::INVALID,
            with_transform: true,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityGroup
// ---------------------------------------------------------------------------

/// A self-contained collection of entities and their components.
#[derive(Debug, Clone, Default)]
pub struct EntityGroup {
    pub(crate) allocator: IdentityAllocator,
    pub(crate) entities: ComponentTable<Entity>,
    pub(crate) transforms: ComponentTable<Transform>,
    pub(crate) mesh_renderers: ComponentTable<MeshRenderer>,
    pub(crate) animators: ComponentTable<Animator>,
    pub(crate) rigid_bodies: ComponentTable<RigidBody>,
    pub(crate) point_lights: ComponentTable<PointLight>,
    pub(crate) spot_lights: ComponentTable<SpotLight>,
    pub(crate) cameras: ComponentTable<Camera>,
    pub(crate) players: ComponentTable<Player>,
}

impl EntityGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an entity with a fresh id and a default root transform.
    pub fn create_entity(&mut self, name: &str) -> EntityId {
        let id = self
            .allocator
            .allocate(|candidate| self.entities.contains(candidate));
        self.insert_entity_record(id, name, true);
        id
    }

    /// Create an entity with explicit options.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateKey`] if `options.id` is already in use.
    pub fn create_entity_with(
        &mut self,
        name: &str,
        options: EntityOptions,
    ) -> Result<EntityId, EcsError> {
        let id = if options.id.is_valid() {
            if self.entities.contains(options.id) {
                return Err(EcsError::DuplicateKey { id: options.id });
            }
            self.allocator.observe(options.id);
            options.id
        } else {
            self.allocator
                .allocate(|candidate| self.entities.contains(candidate))
        };
        self.insert_entity_record(id, name, options.with_transform);
        Ok(id)
    }

    fn insert_entity_record(&mut self, id: EntityId, name: &str, with_transform: bool) {
        // Both ids were checked against `entities` above; the transform table
        // is keyed by the same ids.
        self.entities
            .add(id, Entity::new(name))
            .expect("entity id checked unique before insertion");
        if with_transform && !self.transforms.contains(id) {
            self.transforms
                .add(id, Transform::default())
                .expect("transform id checked unique before insertion");
        }
        tracing::debug!(entity = %id, name, "entity created");
    }

    /// Destroy an entity and its whole subtree. See
    /// [`destroy_entity_with`](Self::destroy_entity_with).
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        self.destroy_entity_with(id, &mut NoHooks)
    }

    /// Destroy an entity, all of its descendants, and every component keyed
    /// by their ids.
    ///
    /// Returns `false` (and changes nothing) if `id` is unknown, so repeated
    /// deletes are harmless. Children are destroyed before their parent.
    /// Components are removed in a fixed order so that external cleanup
    /// (physics body, shadow map) runs while the entity record still exists.
    pub fn destroy_entity_with(&mut self, id: EntityId, hooks: &mut dyn ResourceHooks) -> bool {
        if !self.entities.contains(id) {
            return false;
        }

        // Unlink from the parent first so the parent never lists a dead id.
        if let Some(parent) = self.transforms.get(id).map(|t| t.parent) {
            if parent.is_valid() {
                if let Some(parent_t) = self.transforms.get_mut(parent) {
                    parent_t.children.retain(|&c| c != id);
                }
            }
        }

        self.destroy_subtree(id, hooks);
        true
    }

    fn destroy_subtree(&mut self, id: EntityId, hooks: &mut dyn ResourceHooks) {
        let children = self
            .transforms
            .get(id)
            .map(|t| t.children.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_subtree(child, hooks);
        }

        self.transforms.remove(id);
        self.mesh_renderers.remove(id);
        self.animators.remove(id);
        if let Some(body) = self.rigid_bodies.remove(id) {
            hooks.detach_rigid_body(id, &body);
        }
        self.players.remove(id);
        self.cameras.remove(id);
        if let Some(light) = self.spot_lights.remove(id) {
            hooks.release_spot_light(id, &light);
        }
        self.point_lights.remove(id);
        self.entities.remove(id);
        tracing::debug!(entity = %id, "entity destroyed");
    }

    /// Destroy every entity.
    pub fn clear_with(&mut self, hooks: &mut dyn ResourceHooks) {
        for root in self.roots() {
            self.destroy_entity_with(root, hooks);
        }
        // Entities without a transform are not reachable through roots.
        let remaining: Vec<EntityId> = self.entities.ids().to_vec();
        for id in remaining {
            self.destroy_entity_with(id, hooks);
        }
    }

    /// Destroy every entity without external hooks.
    pub fn clear(&mut self) {
        self.clear_with(&mut NoHooks);
    }

    // -- queries ------------------------------------------------------------

    /// Whether `id` names a live entity.
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The entity record for `id`.
    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.entities.get(id).map(|e| e.name.as_str())
    }

    /// First entity (in storage order) with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| id)
    }

    /// Entities whose transform has no parent, in storage order.
    pub fn roots(&self) -> Vec<EntityId> {
        self.transforms
            .iter()
            .filter(|(_, t)| t.is_root())
            .map(|(id, _)| id)
            .collect()
    }

    /// Set the entity's own active flag. Returns `false` if unknown.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.active = active;
                true
            }
            None => false,
        }
    }

    /// Change the entity's display name. Returns `false` if unknown.
    pub fn rename(&mut self, id: EntityId, name: &str) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.name = name.to_owned();
                true
            }
            None => false,
        }
    }

    /// Whether the entity and all of its ancestors are active.
    pub fn is_active_in_hierarchy(&self, id: EntityId) -> bool {
        let mut current = id;
        // Bounded by the entity count so a corrupted hierarchy cannot hang.
        for _ in 0..=self.entities.len() {
            match self.entities.get(current) {
                Some(entity) if entity.active => {}
                _ => return false,
            }
            match self.transforms.get(current) {
                Some(t) if t.parent.is_valid() => current = t.parent,
                _ => return true,
            }
        }
        panic!("hierarchy cycle detected while walking ancestors of {id}");
    }

    // -- typed component access ---------------------------------------------

    /// The table storing component kind `T`.
    #[inline]
    pub fn table<T: Component>(&self) -> &ComponentTable<T> {
        T::table(self)
    }

    /// Non-failing lookup: `None` means the component is absent.
    #[inline]
    pub fn get<T: Component>(&self, id: EntityId) -> Option<&T> {
        T::table(self).get(id)
    }

    /// Mutable lookup.
    ///
    /// Not available for [`Transform`], whose writes must go through the
    /// hierarchy operations.
    #[inline]
    pub fn get_mut<T: Component + MutableComponent>(&mut self, id: EntityId) -> Option<&mut T> {
        T::table_mut(self).get_mut(id)
    }

    #[inline]
    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        T::table(self).contains(id)
    }

    /// Attach a component to an existing entity.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownEntity`] if `id` is not a live entity.
    /// - [`EcsError::DuplicateKey`] if the entity already has a `T`.
    pub fn insert<T: Component + MutableComponent>(
        &mut self,
        id: EntityId,
        component: T,
    ) -> Result<&mut T, EcsError> {
        if !self.entities.contains(id) {
            return Err(EcsError::UnknownEntity { id });
        }
        T::table_mut(self).add(id, component)
    }

    /// Detach a component from an entity, returning it.
    pub fn remove_component<T: Component + MutableComponent>(&mut self, id: EntityId) -> Option<T> {
        T::table_mut(self).remove(id)
    }

    /// Iterate `(id, component)` pairs of kind `T`.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        T::table(self).iter()
    }

    /// Iterate `(id, component)` pairs of kind `T` mutably.
    pub fn iter_mut<T: Component + MutableComponent>(
        &mut self,
    ) -> impl Iterator<Item = (EntityId, &mut T)> + '_ {
        T::table_mut(self).iter_mut()
    }

    /// Whether every table satisfies its id/index invariant.
    pub fn is_consistent(&self) -> bool {
        self.entities.is_consistent()
            && self.transforms.is_consistent()
            && self.mesh_renderers.is_consistent()
            && self.animators.is_consistent()
            && self.rigid_bodies.is_consistent()
            && self.point_lights.is_consistent()
            && self.spot_lights.is_consistent()
            && self.cameras.is_consistent()
            && self.players.is_consistent()
    }

    /// Whether any table holds a record for `id`.
    pub fn any_component(&self, id: EntityId) -> bool {
        self.entities.contains(id)
            || self.transforms.contains(id)
            || self.mesh_renderers.contains(id)
            || self.animators.contains(id)
            || self.rigid_bodies.contains(id)
            || self.point_lights.contains(id)
            || self.spot_lights.contains(id)
            || self.cameras.contains(id)
            || self.players.contains(id)
    }
}

/// Component kinds that callers may mutate or attach freely.
///
/// [`Transform`] is excluded: its writes must keep the cached world matrix and
/// hierarchy links in sync, so they live in the hierarchy module. [`Entity`]
/// is excluded: the record is created with the entity and removed only by
/// [`EntityGroup::destroy_entity_with`], which cascades to every table. Use
/// [`EntityGroup::rename`] and [`EntityGroup::set_active`] to edit it.
///
/// ```compile_fail
/// use ferrule_ecs::prelude::*;
///
/// let mut group = EntityGroup::new();
/// let e = group.create_entity("crate");
/// group.remove_component::<Entity>(e);
/// ```
pub trait MutableComponent {}

impl MutableComponent for MeshRenderer {}
impl MutableComponent for Animator {}
impl MutableComponent for RigidBody {}
impl MutableComponent for PointLight {}
impl MutableComponent for SpotLight {}
impl MutableComponent for Camera {}
impl MutableComponent for Player {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ColliderShape, MotionType};

    #[derive(Default)]
    struct RecordingHooks {
        detached: Vec<EntityId>,
        released: Vec<EntityId>,
    }

    impl ResourceHooks for RecordingHooks {
        fn detach_rigid_body(&mut self, entity: EntityId, _body: &RigidBody) {
            self.detached.push(entity);
        }

        fn release_spot_light(&mut self, entity: EntityId, _light: &SpotLight) {
            self.released.push(entity);
        }
    }

    #[test]
    fn create_entity_attaches_transform() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("crate");
        assert!(group.contains(e));
        assert!(group.has::<Transform>(e));
        assert_eq!(group.name(e), Some("crate"));
        assert!(group.entity(e).unwrap().active);
    }

    #[test]
    fn create_without_transform() {
        let mut group = EntityGroup::new();
        let e = group
            .create_entity_with(
                "manager",
                EntityOptions {
                    with_transform: false,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!group.has::<Transform>(e));
    }

    #[test]
    fn explicit_id_duplicate_is_rejected() {
        let mut group = EntityGroup::new();
        let options = EntityOptions {
            id: EntityId::new(10),
            ..Default::default()
        };
        group.create_entity_with("a", options).unwrap();
        let err = group.create_entity_with("b", options).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateKey { .. }));
        assert_eq!(group.entity_count(), 1);
    }

    #[test]
    fn allocator_skips_explicit_ids() {
        let mut group = EntityGroup::new();
        group
            .create_entity_with(
                "loaded",
                EntityOptions {
                    id: EntityId::new(0),
                    ..Default::default()
                },
            )
            .unwrap();
        let fresh = group.create_entity("fresh");
        assert_ne!(fresh, EntityId::new(0));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("e");
        let keep = group.create_entity("keep");
        assert!(group.destroy_entity(e));
        assert!(!group.destroy_entity(e));
        assert!(!group.destroy_entity(EntityId::new(999)));
        assert_eq!(group.entity_count(), 1);
        assert!(group.contains(keep));
    }

    #[test]
    fn destroy_invokes_hooks_and_removes_components() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("lamp");
        group
            .insert(
                e,
                RigidBody::new(ColliderShape::Sphere { radius: 0.5 }, MotionType::Dynamic),
            )
            .unwrap();
        group.insert(e, SpotLight::default()).unwrap();
        group.insert(e, PointLight::default()).unwrap();
        group.insert(e, Camera::default()).unwrap();

        let mut hooks = RecordingHooks::default();
        assert!(group.destroy_entity_with(e, &mut hooks));
        assert_eq!(hooks.detached, vec![e]);
        assert_eq!(hooks.released, vec![e]);
        assert!(!group.any_component(e));
        assert!(group.is_consistent());
    }

    #[test]
    fn insert_on_unknown_entity_fails() {
        let mut group = EntityGroup::new();
        let err = group
            .insert(EntityId::new(3), Camera::default())
            .unwrap_err();
        assert!(matches!(err, EcsError::UnknownEntity { .. }));
    }

    #[test]
    fn typed_access_roundtrip() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("player");
        group.insert(e, Player::default()).unwrap();
        group.get_mut::<Player>(e).unwrap().move_speed = 9.0;
        assert_eq!(group.get::<Player>(e).unwrap().move_speed, 9.0);
        assert!(group.get::<Camera>(e).is_none());
        let removed = group.remove_component::<Player>(e).unwrap();
        assert_eq!(removed.move_speed, 9.0);
        assert!(!group.has::<Player>(e));
    }

    #[test]
    fn find_by_name_and_clear() {
        let mut group = EntityGroup::new();
        let a = group.create_entity("alpha");
        group.create_entity("beta");
        assert_eq!(group.find_by_name("alpha"), Some(a));
        assert_eq!(group.find_by_name("gamma"), None);
        group.clear();
        assert_eq!(group.entity_count(), 0);
        assert!(group.is_consistent());
    }

    // -- entity record ---------------------------------------------------

    #[test]
    fn entity_record_edits_go_through_accessors() {
        let mut group = EntityGroup::new();
        let e = group.create_entity("cam");
        group.insert(e, Camera::default()).unwrap();

        assert!(group.rename(e, "main_cam"));
        assert!(group.set_active(e, false));
        assert_eq!(group.find_by_name("main_cam"), Some(e));
        assert!(!group.entity(e).unwrap().active);
        assert!(!group.rename(EntityId::new(99), "ghost"));

        // The record only goes away together with the rest of the entity.
        assert!(group.destroy_entity(e));
        assert!(!group.any_component(e));
        assert!(!group.roots().contains(&e));
        assert!(group.is_consistent());
    }
}
