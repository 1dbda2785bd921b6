//! Deep copies of entity subtrees ("prefab instancing").
//!
//! A copy runs in two passes over an owned [`SubtreeTemplate`]:
//!
//! 1. Pre-order, each template node becomes a new entity in the destination
//!    group with the same name, active flag and local transform, attached to
//!    the already-created copy of its parent. Components are cloned
//!    field-for-field; shared assets (meshes, materials, clips) are cloned as
//!    `Arc`s, never as data.
//! 2. Once the whole subtree exists, entity references held by components
//!    (renderer root and bones, animator targets, player camera target) are
//!    remapped through the old-to-new id table, and rigid bodies request
//!    their physics body from the [`ResourceHooks`] at their final world
//!    pose. References to entities outside the subtree are kept as they are.
//!
//! If any step fails, every entity created by the call is destroyed again
//! (with hooks, so physics bodies created so far are removed) and the error
//! is returned. The destination is left as it was before the call.

use std::collections::HashMap;

use ferrule_ecs::components::{
    Animator, Camera, Entity, MeshRenderer, Player, PointLight, RigidBody, SpotLight,
};
use ferrule_ecs::entity::EntityId;
use ferrule_ecs::group::{EntityGroup, EntityOptions, ResourceHooks};
use ferrule_ecs::EcsError;
use glam::{Quat, Vec3};

// ---------------------------------------------------------------------------
// SubtreeTemplate
// ---------------------------------------------------------------------------

/// Local transform fields of a template node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

/// One entity of a captured subtree with all of its components.
#[derive(Debug, Clone)]
pub struct TemplateNode {
    /// Id in the group the template was captured from.
    pub source: EntityId,
    /// Index of the parent node, `None` for the template root.
    pub parent: Option<usize>,
    pub entity: Entity,
    pub transform: Option<LocalPose>,
    pub mesh_renderer: Option<MeshRenderer>,
    pub animator: Option<Animator>,
    pub rigid_body: Option<RigidBody>,
    pub point_light: Option<PointLight>,
    pub spot_light: Option<SpotLight>,
    pub camera: Option<Camera>,
    pub player: Option<Player>,
}

/// An owned, pre-order copy of an entity subtree.
///
/// Capturing decouples the copy from the source group, which makes copies
/// within a single group possible and lets a prefab be instantiated many
/// times without walking the source again.
#[derive(Debug, Clone)]
pub struct SubtreeTemplate {
    nodes: Vec<TemplateNode>,
}

impl SubtreeTemplate {
    /// Capture `root` and all of its descendants. `None` if `root` is not a
    /// live entity of `group`.
    pub fn capture(group: &EntityGroup, root: EntityId) -> Option<Self> {
        let order = group.subtree(root);
        if order.is_empty() {
            return None;
        }
        let index: HashMap<EntityId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut nodes = Vec::with_capacity(order.len());
        for (i, &id) in order.iter().enumerate() {
            let entity = group.entity(id)?.clone();
            let parent = if i == 0 {
                None
            } else {
                group.parent(id).and_then(|p| index.get(&p).copied())
            };
            let transform = group.transform(id).map(|t| LocalPose {
                position: t.local_position(),
                rotation: t.local_rotation(),
                scale: t.local_scale(),
            });
            nodes.push(TemplateNode {
                source: id,
                parent,
                entity,
                transform,
                mesh_renderer: group.get::<MeshRenderer>(id).cloned(),
                animator: group.get::<Animator>(id).cloned(),
                rigid_body: group.get::<RigidBody>(id).cloned().map(|mut body| {
                    body.body = None;
                    body
                }),
                point_light: group.get::<PointLight>(id).cloned(),
                spot_light: group.get::<SpotLight>(id).cloned().map(|mut light| {
                    light.shadow_map = None;
                    light
                }),
                camera: group.get::<Camera>(id).cloned(),
                player: group.get::<Player>(id).cloned(),
            });
        }
        Some(Self { nodes })
    }

    /// Source id of the template root.
    pub fn root(&self) -> EntityId {
        self.nodes[0].source
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a template holds at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in pre-order, root first.
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Instantiate into `dst` under `parent` ([`EntityId::INVALID`] for a
    /// new root). Shorthand for [`EntityCopier::instantiate`].
    pub fn instantiate(
        &self,
        dst: &mut EntityGroup,
        parent: EntityId,
        hooks: &mut dyn ResourceHooks,
    ) -> Result<EntityId, EcsError> {
        EntityCopier::new().instantiate(self, dst, parent, hooks)
    }
}

// ---------------------------------------------------------------------------
// EntityCopier
// ---------------------------------------------------------------------------

/// Working state of one copy: the id remap table and the components that
/// need the second pass.
#[derive(Debug, Default)]
pub struct EntityCopier {
    remap: HashMap<EntityId, EntityId>,
    created: Vec<EntityId>,
    mesh_renderers: Vec<EntityId>,
    animators: Vec<EntityId>,
    players: Vec<EntityId>,
    rigid_bodies: Vec<EntityId>,
}

impl EntityCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// New id of a copied entity, if it was part of the last copy.
    pub fn remapped(&self, source: EntityId) -> Option<EntityId> {
        self.remap.get(&source).copied()
    }

    /// Ids created by the last successful copy, pre-order.
    pub fn created(&self) -> &[EntityId] {
        &self.created
    }

    fn reset(&mut self) {
        self.remap.clear();
        self.created.clear();
        self.mesh_renderers.clear();
        self.animators.clear();
        self.players.clear();
        self.rigid_bodies.clear();
    }

    /// Copy `template` into `dst`, returning the new root.
    ///
    /// # Errors
    ///
    /// - [`EcsError::MissingTransform`] if `parent` is valid but has no
    ///   transform, or a transformed node hangs below one without.
    /// - Any error from [`ResourceHooks::attach_rigid_body`], typically
    ///   [`EcsError::ResourceUnavailable`].
    ///
    /// On error `dst` is rolled back to its previous entity set.
    pub fn instantiate(
        &mut self,
        template: &SubtreeTemplate,
        dst: &mut EntityGroup,
        parent: EntityId,
        hooks: &mut dyn ResourceHooks,
    ) -> Result<EntityId, EcsError> {
        self.reset();
        if parent.is_valid() && dst.transform(parent).is_none() {
            return Err(EcsError::MissingTransform { id: parent });
        }

        let result = self
            .create_nodes(template, dst, parent)
            .and_then(|()| self.resolve_references(dst, hooks));

        match result {
            Ok(()) => {
                let root = self.created[0];
                tracing::debug!(
                    template = %template.root(),
                    root = %root,
                    entities = self.created.len(),
                    "subtree copied"
                );
                Ok(root)
            }
            Err(err) => {
                tracing::warn!(
                    template = %template.root(),
                    created = self.created.len(),
                    error = %err,
                    "copy failed -- rolling back"
                );
                // Leaves first; ids already removed with a parent are no-ops.
                for &id in self.created.iter().rev() {
                    dst.destroy_entity_with(id, hooks);
                }
                self.reset();
                Err(err)
            }
        }
    }

    /// First pass: entities, transforms and component clones.
    fn create_nodes(
        &mut self,
        template: &SubtreeTemplate,
        dst: &mut EntityGroup,
        parent: EntityId,
    ) -> Result<(), EcsError> {
        for node in &template.nodes {
            let id = dst.create_entity_with(
                &node.entity.name,
                EntityOptions {
                    with_transform: node.transform.is_some(),
                    ..Default::default()
                },
            )?;
            self.created.push(id);
            self.remap.insert(node.source, id);
            dst.set_active(id, node.entity.active);

            if let Some(pose) = node.transform {
                dst.set_local_transform(id, pose.position, pose.rotation, pose.scale)?;
                let new_parent = match node.parent {
                    Some(index) => self.created[index],
                    None => parent,
                };
                if new_parent.is_valid() {
                    dst.attach_keep_local(id, new_parent)?;
                }
            }

            if let Some(renderer) = &node.mesh_renderer {
                dst.insert(id, renderer.clone())?;
                self.mesh_renderers.push(id);
            }
            if let Some(animator) = &node.animator {
                dst.insert(id, animator.clone())?;
                self.animators.push(id);
            }
            if let Some(body) = &node.rigid_body {
                dst.insert(id, body.clone())?;
                self.rigid_bodies.push(id);
            }
            if let Some(light) = &node.point_light {
                dst.insert(id, light.clone())?;
            }
            if let Some(light) = &node.spot_light {
                dst.insert(id, light.clone())?;
            }
            if let Some(camera) = &node.camera {
                dst.insert(id, camera.clone())?;
            }
            if let Some(player) = &node.player {
                dst.insert(id, player.clone())?;
                self.players.push(id);
            }
        }
        Ok(())
    }

    /// Second pass: cross-references and external resources.
    fn resolve_references(
        &self,
        dst: &mut EntityGroup,
        hooks: &mut dyn ResourceHooks,
    ) -> Result<(), EcsError> {
        let remap = &self.remap;
        let map = |id: EntityId| remap.get(&id).copied().unwrap_or(id);

        for &id in &self.mesh_renderers {
            if let Some(renderer) = dst.get_mut::<MeshRenderer>(id) {
                renderer.root_entity = map(renderer.root_entity);
                renderer.bones.iter_mut().for_each(|b| *b = map(*b));
            }
        }
        for &id in &self.animators {
            if let Some(animator) = dst.get_mut::<Animator>(id) {
                animator.root_entity = map(animator.root_entity);
                animator
                    .channel_targets
                    .iter_mut()
                    .for_each(|t| *t = map(*t));
            }
        }
        for &id in &self.players {
            if let Some(player) = dst.get_mut::<Player>(id) {
                player.camera_target = map(player.camera_target);
            }
        }
        for &id in &self.rigid_bodies {
            let position = dst.position(id).unwrap_or(Vec3::ZERO);
            let rotation = dst.rotation(id).unwrap_or(Quat::IDENTITY);
            if let Some(body) = dst.get_mut::<RigidBody>(id) {
                hooks.attach_rigid_body(id, body, position, rotation)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Convenience entry points
// ---------------------------------------------------------------------------

/// Copy the subtree rooted at `template` from `src` into `dst` under
/// `parent`, returning the new root.
///
/// # Errors
///
/// [`EcsError::UnknownEntity`] if `template` is not live in `src`; otherwise
/// as [`EntityCopier::instantiate`].
pub fn copy_entity(
    src: &EntityGroup,
    dst: &mut EntityGroup,
    template: EntityId,
    parent: EntityId,
    hooks: &mut dyn ResourceHooks,
) -> Result<EntityId, EcsError> {
    let captured =
        SubtreeTemplate::capture(src, template).ok_or(EcsError::UnknownEntity { id: template })?;
    captured.instantiate(dst, parent, hooks)
}

/// Copy a subtree within one group.
///
/// # Errors
///
/// As [`copy_entity`].
pub fn duplicate_entity(
    group: &mut EntityGroup,
    template: EntityId,
    parent: EntityId,
    hooks: &mut dyn ResourceHooks,
) -> Result<EntityId, EcsError> {
    let captured = SubtreeTemplate::capture(group, template)
        .ok_or(EcsError::UnknownEntity { id: template })?;
    captured.instantiate(group, parent, hooks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use ferrule_ecs::asset::Mesh;
    use ferrule_ecs::components::{ColliderShape, MotionType};
    use ferrule_ecs::group::NoHooks;

    struct FailingHooks;

    impl ResourceHooks for FailingHooks {
        fn attach_rigid_body(
            &mut self,
            entity: EntityId,
            _body: &mut RigidBody,
            _position: Vec3,
            _rotation: Quat,
        ) -> Result<(), EcsError> {
            Err(EcsError::ResourceUnavailable {
                entity,
                reason: "no physics".to_owned(),
            })
        }
    }

    fn prefab() -> (EntityGroup, EntityId, EntityId, EntityId) {
        let mut lib = EntityGroup::new();
        let root = lib.create_entity("turret");
        let barrel = lib.create_entity("barrel");
        let camera = lib.create_entity("sight");
        lib.attach_keep_local(barrel, root).unwrap();
        lib.attach_keep_local(camera, barrel).unwrap();
        lib.set_local_position(barrel, Vec3::new(0.0, 1.0, 0.0)).unwrap();
        lib.insert(camera, Camera::default()).unwrap();
        lib.insert(
            root,
            Player {
                camera_target: camera,
                ..Default::default()
            },
        )
        .unwrap();
        let mut renderer = MeshRenderer::new(Arc::new(Mesh::new("turret")));
        renderer.root_entity = root;
        renderer.bones = vec![barrel, EntityId::new(999)];
        lib.insert(barrel, renderer).unwrap();
        (lib, root, barrel, camera)
    }

    #[test]
    fn references_inside_subtree_are_remapped() {
        let (lib, root, barrel, _) = prefab();
        let mut scene = EntityGroup::new();
        let mut copier = EntityCopier::new();
        let template = SubtreeTemplate::capture(&lib, root).unwrap();
        let new_root = copier
            .instantiate(&template, &mut scene, EntityId::INVALID, &mut NoHooks)
            .unwrap();

        let new_barrel = copier.remapped(barrel).unwrap();
        let new_camera = scene.children(new_barrel)[0];
        assert_eq!(scene.get::<Player>(new_root).unwrap().camera_target, new_camera);
        let renderer = scene.get::<MeshRenderer>(new_barrel).unwrap();
        assert_eq!(renderer.root_entity, new_root);
        // Outside reference stays verbatim.
        assert_eq!(renderer.bones, vec![new_barrel, EntityId::new(999)]);
        assert_eq!(scene.position(new_barrel), Some(Vec3::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn duplicate_within_group_is_independent() {
        let (mut lib, root, _, _) = prefab();
        let copy = duplicate_entity(&mut lib, root, EntityId::INVALID, &mut NoHooks).unwrap();
        assert_ne!(copy, root);
        assert_eq!(lib.entity_count(), 6);
        lib.get_mut::<Player>(copy).unwrap().move_speed = 1.0;
        assert_eq!(lib.get::<Player>(root).unwrap().move_speed, Player::default().move_speed);
    }

    #[test]
    fn copy_under_parent_offsets_world_pose() {
        let (lib, root, _, _) = prefab();
        let mut scene = EntityGroup::new();
        let anchor = scene.create_entity("anchor");
        scene.set_local_position(anchor, Vec3::new(10.0, 0.0, 0.0)).unwrap();
        let new_root = copy_entity(&lib, &mut scene, root, anchor, &mut NoHooks).unwrap();
        assert_eq!(scene.parent(new_root), Some(anchor));
        assert_eq!(scene.position(new_root), Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn failed_resource_rolls_back() {
        let (mut lib, root, barrel, _) = prefab();
        lib.insert(
            barrel,
            RigidBody::new(ColliderShape::Sphere { radius: 0.5 }, MotionType::Dynamic),
        )
        .unwrap();
        let mut scene = EntityGroup::new();
        let keep = scene.create_entity("keep");
        let err = copy_entity(&lib, &mut scene, root, EntityId::INVALID, &mut FailingHooks).unwrap_err();
        assert!(matches!(err, EcsError::ResourceUnavailable { .. }));
        assert_eq!(scene.entity_count(), 1);
        assert!(scene.contains(keep));
        assert!(scene.is_consistent());
    }

    #[test]
    fn unknown_template_and_parent_are_rejected() {
        let (lib, root, _, _) = prefab();
        let mut scene = EntityGroup::new();
        let err = copy_entity(&lib, &mut scene, EntityId::new(77), EntityId::INVALID, &mut NoHooks)
            .unwrap_err();
        assert!(matches!(err, EcsError::UnknownEntity { .. }));
        let err = copy_entity(&lib, &mut scene, root, EntityId::new(5), &mut NoHooks).unwrap_err();
        assert!(matches!(err, EcsError::MissingTransform { .. }));
        assert_eq!(scene.entity_count(), 0);
    }
}
