//! Renderer extraction.
//!
//! Pure functions that read an [`EntityGroup`] and produce the flat data a
//! GPU backend consumes: draw items, light snapshots and the active camera.
//! Nothing here touches a device, so extraction is testable headless.

use std::sync::Arc;

use ferrule_ecs::asset::{Material, Mesh};
use ferrule_ecs::components::{Camera, MeshRenderer, PointLight, SpotLight};
use ferrule_ecs::entity::EntityId;
use ferrule_ecs::group::EntityGroup;
use ferrule_ecs::math::safe_inverse;
use glam::{Mat4, Vec3};

// ---------------------------------------------------------------------------
// Draw items
// ---------------------------------------------------------------------------

/// One mesh to draw, with a material resolved for every submesh.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub entity: EntityId,
    pub mesh: Arc<Mesh>,
    /// Indexed by submesh.
    pub materials: Vec<Arc<Material>>,
    pub world: Mat4,
    pub cast_shadows: bool,
}

/// Draw items for every mesh renderer whose entity is active in the
/// hierarchy, in ascending id order. Submeshes without a bound material get
/// `default_material`.
pub fn collect_draw_items(group: &EntityGroup, default_material: &Arc<Material>) -> Vec<DrawItem> {
    let mut items: Vec<DrawItem> = group
        .iter::<MeshRenderer>()
        .filter(|(id, _)| group.is_active_in_hierarchy(*id))
        .filter_map(|(id, renderer)| {
            let world = group.world_matrix(id)?;
            let materials = (0..renderer.mesh.submesh_count)
                .map(|submesh| {
                    renderer
                        .material_for(submesh)
                        .map_or_else(|| Arc::clone(default_material), Arc::clone)
                })
                .collect();
            Some(DrawItem {
                entity: id,
                mesh: Arc::clone(&renderer.mesh),
                materials,
                world,
                cast_shadows: renderer.cast_shadows,
            })
        })
        .collect();
    items.sort_unstable_by_key(|item| item.entity);
    items
}

// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Point,
    Spot {
        inner_angle: f32,
        outer_angle: f32,
        casts_shadows: bool,
    },
}

/// A light in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSnapshot {
    pub entity: EntityId,
    pub kind: LightKind,
    pub position: Vec3,
    /// Unit vector the light faces (the entity's local -Z).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

fn facing(group: &EntityGroup, id: EntityId) -> Vec3 {
    group
        .rotation(id)
        .map_or(Vec3::NEG_Z, |r| (r * Vec3::NEG_Z).normalize_or_zero())
}

/// Point lights then spot lights, each in ascending id order, for entities
/// active in the hierarchy.
pub fn collect_lights(group: &EntityGroup) -> Vec<LightSnapshot> {
    let mut points: Vec<LightSnapshot> = group
        .iter::<PointLight>()
        .filter(|(id, _)| group.is_active_in_hierarchy(*id))
        .filter_map(|(id, light)| {
            Some(LightSnapshot {
                entity: id,
                kind: LightKind::Point,
                position: group.position(id)?,
                direction: facing(group, id),
                color: light.color,
                intensity: light.intensity,
                range: light.range,
            })
        })
        .collect();
    points.sort_unstable_by_key(|l| l.entity);

    let mut spots: Vec<LightSnapshot> = group
        .iter::<SpotLight>()
        .filter(|(id, _)| group.is_active_in_hierarchy(*id))
        .filter_map(|(id, light)| {
            Some(LightSnapshot {
                entity: id,
                kind: LightKind::Spot {
                    inner_angle: light.inner_angle,
                    outer_angle: light.outer_angle,
                    casts_shadows: light.casts_shadows,
                },
                position: group.position(id)?,
                direction: facing(group, id),
                color: light.color,
                intensity: light.intensity,
                range: light.range,
            })
        })
        .collect();
    spots.sort_unstable_by_key(|l| l.entity);

    points.extend(spots);
    points
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub entity: EntityId,
    pub camera: Camera,
    pub world: Mat4,
    /// Inverse of `world`.
    pub view: Mat4,
}

impl CameraView {
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.camera.projection(aspect) * self.view
    }
}

/// The active camera with the lowest id whose entity is active in the
/// hierarchy.
pub fn active_camera(group: &EntityGroup) -> Option<CameraView> {
    group
        .iter::<Camera>()
        .filter(|(id, camera)| camera.active && group.is_active_in_hierarchy(*id))
        .filter_map(|(id, camera)| Some((id, camera, group.world_matrix(id)?)))
        .min_by_key(|(id, _, _)| *id)
        .map(|(entity, camera, world)| CameraView {
            entity,
            camera: camera.clone(),
            world,
            view: safe_inverse(&world),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
