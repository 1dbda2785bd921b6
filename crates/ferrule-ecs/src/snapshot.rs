//! Group snapshot and restore.
//!
//! A [`GroupSnapshot`] is a flat, pointer-free description of an
//! [`EntityGroup`]: one record list per component kind, with entity ids for
//! cross references and asset *names* in place of shared handles. It can be
//! written to JSON and later rebuilt against an [`AssetLibrary`].
//!
//! Capture is deterministic: every list is sorted by entity id, so two
//! captures of equal groups serialize to identical bytes.
//!
//! Physics handles and shadow maps are never persisted; whoever owns those
//! resources re-creates them after restore.

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::asset::{AssetLibrary, Mesh};
use crate::components::{
    Animator, Camera, Entity, MaterialSlot, MeshRenderer, Player, PointLight, RigidBody, SpotLight,
    Transform,
};
use crate::entity::{EntityId, IdentityAllocator};
use crate::group::{Component, EntityGroup, EntityOptions};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// A plain-data component paired with its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord<T> {
    pub id: EntityId,
    pub component: T,
}

/// Local transform fields plus hierarchy links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub id: EntityId,
    pub parent: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// Children in traversal order.
    pub children: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSlotRecord {
    pub submesh: u32,
    pub material: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRendererRecord {
    pub id: EntityId,
    pub mesh: String,
    pub materials: Vec<MaterialSlotRecord>,
    pub root_entity: EntityId,
    pub bones: Vec<EntityId>,
    pub cast_shadows: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimatorRecord {
    pub id: EntityId,
    /// Registered clip names, sorted.
    pub animations: Vec<String>,
    pub current: Option<String>,
    pub time: f32,
    pub speed: f32,
    pub playing: bool,
    pub position_cursors: Vec<usize>,
    pub rotation_cursors: Vec<usize>,
    pub channel_targets: Vec<EntityId>,
    pub root_entity: EntityId,
}

/// A complete, serializable snapshot of an [`EntityGroup`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupSnapshot {
    /// Next candidate id of the group's allocator.
    pub next_id: u32,
    pub entities: Vec<ComponentRecord<Entity>>,
    pub transforms: Vec<TransformRecord>,
    pub mesh_renderers: Vec<MeshRendererRecord>,
    pub animators: Vec<AnimatorRecord>,
    pub rigid_bodies: Vec<ComponentRecord<RigidBody>>,
    pub point_lights: Vec<ComponentRecord<PointLight>>,
    pub spot_lights: Vec<ComponentRecord<SpotLight>>,
    pub cameras: Vec<ComponentRecord<Camera>>,
    pub players: Vec<ComponentRecord<Player>>,
}

impl GroupSnapshot {
    /// Total number of records across all lists, entities included.
    pub fn record_count(&self) -> usize {
        self.entities.len()
            + self.transforms.len()
            + self.mesh_renderers.len()
            + self.animators.len()
            + self.rigid_bodies.len()
            + self.point_lights.len()
            + self.spot_lights.len()
            + self.cameras.len()
            + self.players.len()
    }
}

fn plain_records<T: Component + Clone>(group: &EntityGroup) -> Vec<ComponentRecord<T>> {
    let mut out: Vec<_> = group
        .iter::<T>()
        .map(|(id, component)| ComponentRecord {
            id,
            component: component.clone(),
        })
        .collect();
    out.sort_by_key(|r| r.id);
    out
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

impl EntityGroup {
    /// Capture the group as a [`GroupSnapshot`], every list sorted by id.
    pub fn capture_snapshot(&self) -> GroupSnapshot {
        let mut transforms: Vec<TransformRecord> = self
            .transforms
            .iter()
            .map(|(id, t)| TransformRecord {
                id,
                parent: t.parent,
                position: t.position,
                rotation: t.rotation,
                scale: t.scale,
                children: t.children.clone(),
            })
            .collect();
        transforms.sort_by_key(|r| r.id);

        let mut mesh_renderers: Vec<MeshRendererRecord> = self
            .mesh_renderers
            .iter()
            .map(|(id, r)| MeshRendererRecord {
                id,
                mesh: r.mesh.name.clone(),
                materials: r
                    .materials
                    .iter()
                    .map(|slot| MaterialSlotRecord {
                        submesh: slot.submesh,
                        material: slot.material.name.clone(),
                    })
                    .collect(),
                root_entity: r.root_entity,
                bones: r.bones.clone(),
                cast_shadows: r.cast_shadows,
            })
            .collect();
        mesh_renderers.sort_by_key(|r| r.id);

        let mut animators: Vec<AnimatorRecord> = self
            .animators
            .iter()
            .map(|(id, a)| {
                let mut animations: Vec<String> = a.animations.keys().cloned().collect();
                animations.sort();
                AnimatorRecord {
                    id,
                    animations,
                    current: a.current_name().map(str::to_owned),
                    time: a.time,
                    speed: a.speed,
                    playing: a.playing,
                    position_cursors: a.position_cursors.clone(),
                    rotation_cursors: a.rotation_cursors.clone(),
                    channel_targets: a.channel_targets.clone(),
                    root_entity: a.root_entity,
                }
            })
            .collect();
        animators.sort_by_key(|r| r.id);

        GroupSnapshot {
            next_id: self.allocator.peek_next(),
            entities: plain_records::<Entity>(self),
            transforms,
            mesh_renderers,
            animators,
            rigid_bodies: plain_records::<RigidBody>(self),
            point_lights: plain_records::<PointLight>(self),
            spot_lights: plain_records::<SpotLight>(self),
            cameras: plain_records::<Camera>(self),
            players: plain_records::<Player>(self),
        }
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Rebuild a group from `snapshot`, resolving asset names in `assets`.
    ///
    /// Missing assets do not fail the restore: a missing mesh becomes an
    /// empty placeholder, a missing material the library's default material,
    /// and a missing animation clip is dropped. Each substitution logs a
    /// warning.
    ///
    /// # Errors
    ///
    /// - [`EcsError::SnapshotInvalid`] if a record refers to an entity that
    ///   is not in the entity list, or the parent/child links disagree.
    /// - [`EcsError::DuplicateKey`] if a list repeats an id.
    /// - [`EcsError::InvalidParent`] if the links form a cycle.
    pub fn restore_snapshot(
        snapshot: &GroupSnapshot,
        assets: &AssetLibrary,
    ) -> Result<EntityGroup, EcsError> {
        let mut group = EntityGroup::new();

        for record in &snapshot.entities {
            let id = group.create_entity_with(
                &record.component.name,
                EntityOptions {
                    id: record.id,
                    with_transform: false,
                },
            )?;
            group.set_active(id, record.component.active);
        }

        let require = |group: &EntityGroup, id: EntityId, kind: &str| {
            if group.contains(id) {
                Ok(())
            } else {
                Err(EcsError::SnapshotInvalid {
                    details: format!("{kind} record for unknown entity {id}"),
                })
            }
        };

        // Transforms first as roots, then links in recorded child order.
        for record in &snapshot.transforms {
            require(&group, record.id, "transform")?;
            group.add_transform(
                record.id,
                Transform::from_parts(record.position, record.rotation, record.scale),
            )?;
        }
        let mut linked = HashSet::new();
        for record in &snapshot.transforms {
            for &child in &record.children {
                let claimed = snapshot
                    .transforms
                    .iter()
                    .find(|r| r.id == child)
                    .map(|r| r.parent);
                if claimed != Some(record.id) {
                    return Err(EcsError::SnapshotInvalid {
                        details: format!(
                            "{} lists child {child} whose parent is not {}",
                            record.id, record.id
                        ),
                    });
                }
                if !linked.insert(child) {
                    return Err(EcsError::SnapshotInvalid {
                        details: format!("child {child} is listed more than once"),
                    });
                }
                group.attach_keep_local(child, record.id)?;
            }
        }
        for record in snapshot.transforms.iter().filter(|r| r.parent.is_valid()) {
            if group.parent(record.id) != Some(record.parent) {
                return Err(EcsError::SnapshotInvalid {
                    details: format!(
                        "{} names parent {} but is not among its children",
                        record.id, record.parent
                    ),
                });
            }
        }
        group.update_all_world_transforms();

        for record in &snapshot.mesh_renderers {
            require(&group, record.id, "mesh renderer")?;
            let mesh = assets.mesh(&record.mesh).unwrap_or_else(|| {
                tracing::warn!(entity = %record.id, mesh = %record.mesh, "mesh missing -- using placeholder");
                Arc::new(Mesh::placeholder(record.mesh.clone()))
            });
            let materials = record
                .materials
                .iter()
                .map(|slot| MaterialSlot {
                    submesh: slot.submesh,
                    material: assets.material(&slot.material).unwrap_or_else(|| {
                        tracing::warn!(
                            entity = %record.id,
                            material = %slot.material,
                            "material missing -- using default"
                        );
                        assets.default_material()
                    }),
                })
                .collect();
            group.insert(
                record.id,
                MeshRenderer {
                    mesh,
                    materials,
                    root_entity: record.root_entity,
                    bones: record.bones.clone(),
                    cast_shadows: record.cast_shadows,
                },
            )?;
        }

        for record in &snapshot.animators {
            require(&group, record.id, "animator")?;
            group.insert(record.id, restore_animator(record, assets))?;
        }

        restore_plain(&mut group, &snapshot.rigid_bodies, "rigid body", |mut body| {
            body.body = None;
            body
        })?;
        restore_plain(&mut group, &snapshot.point_lights, "point light", |l| l)?;
        restore_plain(&mut group, &snapshot.spot_lights, "spot light", |mut light| {
            light.shadow_map = None;
            light
        })?;
        restore_plain(&mut group, &snapshot.cameras, "camera", |c| c)?;
        restore_plain(&mut group, &snapshot.players, "player", |p| p)?;

        let next = snapshot.next_id.max(group.allocator.peek_next());
        group.allocator = IdentityAllocator::starting_at(next);

        tracing::debug!(
            entities = group.entity_count(),
            records = snapshot.record_count(),
            "group restored from snapshot"
        );
        Ok(group)
    }
}

fn restore_plain<T>(
    group: &mut EntityGroup,
    records: &[ComponentRecord<T>],
    kind: &str,
    fixup: impl Fn(T) -> T,
) -> Result<(), EcsError>
where
    T: Component + crate::group::MutableComponent + Clone,
{
    for record in records {
        if !group.contains(record.id) {
            return Err(EcsError::SnapshotInvalid {
                details: format!("{kind} record for unknown entity {}", record.id),
            });
        }
        group.insert(record.id, fixup(record.component.clone()))?;
    }
    Ok(())
}

fn restore_animator(record: &AnimatorRecord, assets: &AssetLibrary) -> Animator {
    let mut animator = Animator::new();
    for name in &record.animations {
        match assets.animation(name) {
            Some(clip) => animator.add_animation(clip),
            None => {
                tracing::warn!(entity = %record.id, animation = %name, "animation missing -- skipped");
            }
        }
    }
    animator.time = record.time;
    animator.speed = record.speed;
    animator.playing = record.playing;
    animator.root_entity = record.root_entity;
    animator.channel_targets = record.channel_targets.clone();

    let current = record
        .current
        .as_deref()
        .and_then(|name| animator.animations.get(name).cloned());
    if let Some(clip) = current {
        let channels = clip.channels.len();
        let fit = |cursors: &[usize], len_of: &dyn Fn(usize) -> usize| -> Vec<usize> {
            (0..channels)
                .map(|i| {
                    let c = cursors.get(i).copied().unwrap_or(0);
                    if c < len_of(i) {
                        c
                    } else {
                        0
                    }
                })
                .collect()
        };
        animator.position_cursors = fit(&record.position_cursors, &|i| {
            clip.channels[i].position_keys.len()
        });
        animator.rotation_cursors = fit(&record.rotation_cursors, &|i| {
            clip.channels[i].rotation_keys.len()
        });
        animator.channel_targets.resize(channels, EntityId::INVALID);
        animator.current = Some(clip);
    } else {
        if let Some(name) = &record.current {
            tracing::warn!(entity = %record.id, animation = %name, "current animation missing -- stopped");
        }
        animator.time = 0.0;
    }
    animator
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
