//! Parent/child transform hierarchy over an [`EntityGroup`]'s transform table.
//!
//! Every [`Transform`] is either a root (`parent == INVALID`) or attached to
//! exactly one parent that lists it among its children. The graph is kept
//! acyclic: [`EntityGroup::set_parent`] walks the ancestor chain before it
//! mutates anything.
//!
//! World matrices are cached and recomputed synchronously: every setter
//! returns with the cached world matrix of the mutated entity and its whole
//! subtree up to date.
//!
//! ```
//! use ferrule_ecs::prelude::*;
//!
//! let mut group = EntityGroup::new();
//! let parent = group.create_entity("parent");
//! let child = group.create_entity("child");
//! group.set_local_position(parent, Vec3::new(10.0, 0.0, 0.0)).unwrap();
//! group.set_local_position(child, Vec3::new(1.0, 0.0, 0.0)).unwrap();
//!
//! // Reparenting keeps the child where it was in world space.
//! group.set_parent(child, parent).unwrap();
//! assert!((group.position(child).unwrap() - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-4);
//! assert!((group.local_position(child).unwrap() - Vec3::new(-9.0, 0.0, 0.0)).length() < 1e-4);
//! ```

use glam::{Mat4, Quat, Vec3};

use crate::components::Transform;
use crate::entity::EntityId;
use crate::group::EntityGroup;
use crate::math;
use crate::EcsError;

impl EntityGroup {
    // -- read access --------------------------------------------------------

    /// The transform record for `id`.
    #[inline]
    pub fn transform(&self, id: EntityId) -> Option<&Transform> {
        self.transforms.get(id)
    }

    fn transform_mut(&mut self, id: EntityId) -> Result<&mut Transform, EcsError> {
        self.transforms
            .get_mut(id)
            .ok_or(EcsError::MissingTransform { id })
    }

    /// Cached world matrix.
    pub fn world_matrix(&self, id: EntityId) -> Option<Mat4> {
        self.transforms.get(id).map(|t| t.world)
    }

    /// World-space position.
    pub fn position(&self, id: EntityId) -> Option<Vec3> {
        self.transforms
            .get(id)
            .map(|t| math::translation_from_matrix(&t.world))
    }

    /// World-space rotation.
    pub fn rotation(&self, id: EntityId) -> Option<Quat> {
        self.transforms
            .get(id)
            .map(|t| math::quat_from_matrix(&t.world))
    }

    /// World-space scale (lossy under non-uniformly scaled, rotated parents).
    pub fn scale(&self, id: EntityId) -> Option<Vec3> {
        self.transforms
            .get(id)
            .map(|t| math::scale_from_matrix(&t.world))
    }

    pub fn local_position(&self, id: EntityId) -> Option<Vec3> {
        self.transforms.get(id).map(|t| t.position)
    }

    pub fn local_rotation(&self, id: EntityId) -> Option<Quat> {
        self.transforms.get(id).map(|t| t.rotation)
    }

    pub fn local_scale(&self, id: EntityId) -> Option<Vec3> {
        self.transforms.get(id).map(|t| t.scale)
    }

    pub fn local_matrix(&self, id: EntityId) -> Option<Mat4> {
        self.transforms.get(id).map(|t| t.local_matrix())
    }

    /// Parent of `id`, or `None` for roots and entities without a transform.
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.transforms
            .get(id)
            .map(|t| t.parent)
            .filter(|p| p.is_valid())
    }

    /// Direct children in insertion order (empty if none).
    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.transforms
            .get(id)
            .map(|t| t.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `ancestor` appears on the parent chain of `candidate`.
    /// An entity is not its own descendant.
    pub fn is_descendant(&self, candidate: EntityId, ancestor: EntityId) -> bool {
        let mut current = self.parent(candidate);
        let mut steps = 0usize;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            steps += 1;
            assert!(
                steps <= self.transforms.len(),
                "hierarchy cycle detected above {candidate}"
            );
            current = self.parent(p);
        }
        false
    }

    /// Number of ancestors (0 for a root).
    pub fn depth(&self, id: EntityId) -> Option<usize> {
        self.transforms.get(id)?;
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(p) = current {
            depth += 1;
            assert!(
                depth <= self.transforms.len(),
                "hierarchy cycle detected above {id}"
            );
            current = self.parent(p);
        }
        Some(depth)
    }

    /// Topmost ancestor (the entity itself if it is a root).
    pub fn root_of(&self, id: EntityId) -> Option<EntityId> {
        self.transforms.get(id)?;
        let mut current = id;
        let mut steps = 0usize;
        while let Some(p) = self.parent(current) {
            current = p;
            steps += 1;
            assert!(
                steps <= self.transforms.len(),
                "hierarchy cycle detected above {id}"
            );
        }
        Some(current)
    }

    /// `id` followed by all of its descendants, pre-order.
    pub fn subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        if !self.entities.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(e) = stack.pop() {
            out.push(e);
            assert!(
                out.len() <= self.entities.len(),
                "hierarchy cycle detected below {id}"
            );
            stack.extend(self.children(e).iter().rev().copied());
        }
        out
    }

    /// All descendants of `id`, pre-order, excluding `id`.
    pub fn descendants(&self, id: EntityId) -> Vec<EntityId> {
        let mut all = self.subtree(id);
        if !all.is_empty() {
            all.remove(0);
        }
        all
    }

    // -- attach / detach ----------------------------------------------------

    /// Give an existing entity a root transform with the given local fields.
    ///
    /// Any parent/children links carried by `transform` are discarded.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownEntity`] or [`EcsError::DuplicateKey`].
    pub fn add_transform(&mut self, id: EntityId, transform: Transform) -> Result<(), EcsError> {
        if !self.entities.contains(id) {
            return Err(EcsError::UnknownEntity { id });
        }
        let record = Transform::from_parts(transform.position, transform.rotation, transform.scale);
        self.transforms.add(id, record)?;
        self.update_world_transform(id)
    }

    /// Remove the transform of an unlinked entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::TransformInUse`] while the entity has a parent or children.
    pub fn remove_transform(&mut self, id: EntityId) -> Result<Option<Transform>, EcsError> {
        match self.transforms.get(id) {
            None => Ok(None),
            Some(t) if !t.is_root() || !t.children.is_empty() => {
                Err(EcsError::TransformInUse { id })
            }
            Some(_) => Ok(self.transforms.remove(id)),
        }
    }

    // -- world matrix propagation -------------------------------------------

    /// Recompute the world matrix of `id` from its parent's cached world
    /// matrix, then recurse into every descendant.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingTransform`] if `id` has no transform.
    pub fn update_world_transform(&mut self, id: EntityId) -> Result<(), EcsError> {
        let parent = self
            .transforms
            .get(id)
            .ok_or(EcsError::MissingTransform { id })?
            .parent;
        let parent_world = self
            .transforms
            .get(parent)
            .map(|t| t.world)
            .unwrap_or(Mat4::IDENTITY);

        let limit = self.transforms.len();
        let mut visited = 0usize;
        let mut stack = vec![(id, parent_world)];
        while let Some((e, parent_world)) = stack.pop() {
            visited += 1;
            assert!(visited <= limit, "hierarchy cycle detected below {id}");
            let Some(t) = self.transforms.get_mut(e) else {
                continue;
            };
            let world = parent_world * t.local_matrix();
            t.world = world;
            stack.extend(t.children.iter().rev().map(|&c| (c, world)));
        }
        Ok(())
    }

    /// Recompute every root's subtree.
    pub fn update_all_world_transforms(&mut self) {
        for root in self.roots() {
            // Roots come from the transform table, so they always exist.
            let _ = self.update_world_transform(root);
        }
    }

    // -- local setters ------------------------------------------------------

    pub fn set_local_position(&mut self, id: EntityId, position: Vec3) -> Result<(), EcsError> {
        self.transform_mut(id)?.position = position;
        self.update_world_transform(id)
    }

    pub fn set_local_rotation(&mut self, id: EntityId, rotation: Quat) -> Result<(), EcsError> {
        self.transform_mut(id)?.rotation = rotation;
        self.update_world_transform(id)
    }

    pub fn set_local_scale(&mut self, id: EntityId, scale: Vec3) -> Result<(), EcsError> {
        self.transform_mut(id)?.scale = scale;
        self.update_world_transform(id)
    }

    /// Write all three local fields with a single recompute.
    pub fn set_local_transform(
        &mut self,
        id: EntityId,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
    ) -> Result<(), EcsError> {
        let t = self.transform_mut(id)?;
        t.position = position;
        t.rotation = rotation;
        t.scale = scale;
        self.update_world_transform(id)
    }

    // -- world setters ------------------------------------------------------

    fn parent_world(&self, id: EntityId) -> Mat4 {
        self.parent(id)
            .and_then(|p| self.world_matrix(p))
            .unwrap_or(Mat4::IDENTITY)
    }

    /// Move `id` so that its world-space position becomes `position`.
    pub fn set_position(&mut self, id: EntityId, position: Vec3) -> Result<(), EcsError> {
        self.transforms
            .get(id)
            .ok_or(EcsError::MissingTransform { id })?;
        let inverse_parent = math::safe_inverse(&self.parent_world(id));
        let local = inverse_parent.transform_point3(position);
        self.set_local_position(id, local)
    }

    /// Rotate `id` so that its world-space rotation becomes `rotation`.
    pub fn set_rotation(&mut self, id: EntityId, rotation: Quat) -> Result<(), EcsError> {
        self.transforms
            .get(id)
            .ok_or(EcsError::MissingTransform { id })?;
        let parent_rotation = math::quat_from_matrix(&self.parent_world(id));
        let local = (parent_rotation.inverse() * rotation).normalize();
        self.set_local_rotation(id, local)
    }

    // -- reparenting --------------------------------------------------------

    fn validate_parent(&self, child: EntityId, parent: EntityId) -> Result<(), EcsError> {
        if !self.transforms.contains(child) {
            return Err(EcsError::MissingTransform { id: child });
        }
        if !parent.is_valid() {
            return Ok(());
        }
        if parent == child || self.is_descendant(parent, child) {
            return Err(EcsError::InvalidParent { child, parent });
        }
        if !self.transforms.contains(parent) {
            return Err(EcsError::MissingTransform { id: parent });
        }
        Ok(())
    }

    /// Attach `child` under `parent` without moving it in world space.
    ///
    /// The child is first detached (its world pose baked into its local
    /// fields), then its local transform is re-expressed relative to the new
    /// parent. Passing [`EntityId::INVALID`] just detaches.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidParent`] if `parent` is `child` or one of its
    ///   descendants. Nothing is modified.
    /// - [`EcsError::MissingTransform`] if either entity has no transform.
    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) -> Result<(), EcsError> {
        self.validate_parent(child, parent)?;
        self.remove_parent(child)?;
        if !parent.is_valid() {
            return Ok(());
        }

        let child_world = self.transforms.get(child).map(|t| t.world).unwrap_or_default();
        let parent_world = self.transforms.get(parent).map(|t| t.world).unwrap_or_default();
        let local = math::safe_inverse(&parent_world) * child_world;
        let (scale, rotation, position) = math::decompose(&local);

        self.link(child, parent);
        let t = self.transform_mut(child)?;
        t.position = position;
        t.rotation = rotation;
        t.scale = scale;
        tracing::trace!(child = %child, parent = %parent, "reparented");
        self.update_world_transform(child)
    }

    /// Detach `child` from its parent, baking its world pose into its local
    /// fields. No-op for roots.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingTransform`] if `child` has no transform.
    pub fn remove_parent(&mut self, child: EntityId) -> Result<(), EcsError> {
        let t = self.transform_mut(child)?;
        if t.is_root() {
            return Ok(());
        }
        let (scale, rotation, position) = math::decompose(&t.world);
        t.position = position;
        t.rotation = rotation;
        t.scale = scale;
        self.unlink(child);
        self.update_world_transform(child)
    }

    /// Attach `child` under `parent` keeping its local fields as they are.
    ///
    /// Used when instantiating prefabs and restoring snapshots, where local
    /// fields are already relative to the intended parent.
    pub fn attach_keep_local(&mut self, child: EntityId, parent: EntityId) -> Result<(), EcsError> {
        self.validate_parent(child, parent)?;
        self.unlink(child);
        if parent.is_valid() {
            self.link(child, parent);
        }
        self.update_world_transform(child)
    }

    fn link(&mut self, child: EntityId, parent: EntityId) {
        if let Some(p) = self.transforms.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.transforms.get_mut(child) {
            c.parent = parent;
        }
    }

    fn unlink(&mut self, child: EntityId) {
        let Some(old_parent) = self.transforms.get(child).map(|t| t.parent) else {
            return;
        };
        if let Some(p) = self.transforms.get_mut(old_parent) {
            p.children.retain(|&c| c != child);
        }
        if let Some(c) = self.transforms.get_mut(child) {
            c.parent = EntityId::INVALID;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < EPS
    }

    fn chain(group: &mut EntityGroup, n: usize) -> Vec<EntityId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let e = group.create_entity(&format!("n{i}"));
            group
                .set_local_position(e, Vec3::new(1.0, 0.0, 0.0))
                .unwrap();
            if let Some(&prev) = ids.last() {
                group.attach_keep_local(e, prev).unwrap();
            }
            ids.push(e);
        }
        ids
    }

    #[test]
    fn child_world_is_parent_times_local() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 3);
        assert!(approx(group.position(ids[2]).unwrap(), Vec3::new(3.0, 0.0, 0.0)));
        let expected = group.world_matrix(ids[1]).unwrap() * group.local_matrix(ids[2]).unwrap();
        assert!(group.world_matrix(ids[2]).unwrap().abs_diff_eq(expected, EPS));
    }

    #[test]
    fn moving_internal_node_moves_subtree() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 3);
        group
            .set_local_position(ids[0], Vec3::new(10.0, 0.0, 0.0))
            .unwrap();
        assert!(approx(group.position(ids[2]).unwrap(), Vec3::new(12.0, 0.0, 0.0)));
    }

    #[test]
    fn set_parent_preserves_world_pose() {
        let mut group = EntityGroup::new();
        let parent = group.create_entity("parent");
        group
            .set_local_transform(
                parent,
                Vec3::new(5.0, -2.0, 1.0),
                Quat::from_rotation_y(1.2),
                Vec3::splat(2.0),
            )
            .unwrap();
        let child = group.create_entity("child");
        group
            .set_local_transform(
                child,
                Vec3::new(0.5, 3.0, -4.0),
                Quat::from_rotation_x(0.4),
                Vec3::ONE,
            )
            .unwrap();
        let before_pos = group.position(child).unwrap();
        let before_rot = group.rotation(child).unwrap();

        group.set_parent(child, parent).unwrap();

        assert_eq!(group.parent(child), Some(parent));
        assert_eq!(group.children(parent), &[child]);
        assert!(approx(group.position(child).unwrap(), before_pos));
        assert!(group.rotation(child).unwrap().dot(before_rot).abs() > 1.0 - EPS);
    }

    #[test]
    fn remove_parent_bakes_world_into_local() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 2);
        group.remove_parent(ids[1]).unwrap();
        assert!(group.transform(ids[1]).unwrap().is_root());
        assert!(group.children(ids[0]).is_empty());
        assert!(approx(group.local_position(ids[1]).unwrap(), Vec3::new(2.0, 0.0, 0.0)));
        // Removing again is a no-op.
        group.remove_parent(ids[1]).unwrap();
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 3);
        let err = group.set_parent(ids[0], ids[2]).unwrap_err();
        assert!(matches!(err, EcsError::InvalidParent { .. }));
        let err = group.set_parent(ids[1], ids[1]).unwrap_err();
        assert!(matches!(err, EcsError::InvalidParent { .. }));
        assert_eq!(group.parent(ids[1]), Some(ids[0]));
        assert!(group.transform(ids[0]).unwrap().is_root());
    }

    #[test]
    fn set_position_hits_world_target() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 2);
        group
            .set_local_rotation(ids[0], Quat::from_rotation_z(0.9))
            .unwrap();
        let target = Vec3::new(-3.0, 7.0, 2.0);
        group.set_position(ids[1], target).unwrap();
        assert!(approx(group.position(ids[1]).unwrap(), target));

        let target_rot = Quat::from_rotation_x(0.3);
        group.set_rotation(ids[1], target_rot).unwrap();
        assert!(group.rotation(ids[1]).unwrap().dot(target_rot).abs() > 1.0 - EPS);
    }

    #[test]
    fn traversal_helpers() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 4);
        assert_eq!(group.depth(ids[3]), Some(3));
        assert_eq!(group.root_of(ids[3]), Some(ids[0]));
        assert!(group.is_descendant(ids[3], ids[0]));
        assert!(!group.is_descendant(ids[0], ids[3]));
        assert!(!group.is_descendant(ids[0], ids[0]));
        assert_eq!(group.subtree(ids[1]), vec![ids[1], ids[2], ids[3]]);
        assert_eq!(group.descendants(ids[2]), vec![ids[3]]);
    }

    #[test]
    fn destroy_unlinks_from_parent() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 3);
        assert!(group.destroy_entity(ids[1]));
        assert!(group.children(ids[0]).is_empty());
        assert!(!group.contains(ids[2]));
        assert!(group.is_consistent());
    }

    #[test]
    fn setters_on_missing_transform_fail() {
        let mut group = EntityGroup::new();
        let err = group
            .set_local_position(EntityId::new(42), Vec3::ONE)
            .unwrap_err();
        assert!(matches!(err, EcsError::MissingTransform { .. }));
        assert!(group.position(EntityId::new(42)).is_none());
    }

    #[test]
    fn zero_scale_parent_does_not_poison_child() {
        let mut group = EntityGroup::new();
        let ids = chain(&mut group, 2);
        group.set_local_scale(ids[0], Vec3::new(1.0, 0.0, 1.0)).unwrap();
        group.remove_parent(ids[1]).unwrap();
        let t = group.transform(ids[1]).unwrap();
        assert!(t.local_position().is_finite());
        assert!(t.local_rotation().is_finite());
        assert!(t.local_scale().is_finite());
        assert!(group.world_matrix(ids[1]).unwrap().is_finite());
    }
}
