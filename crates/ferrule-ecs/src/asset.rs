//! Immutable shared assets referenced by components.
//!
//! Meshes, materials and animation clips are loaded once and shared through
//! [`Arc`]s by any number of components, in any number of groups. Nothing in
//! the core mutates an asset after load, so no synchronization is needed.
//!
//! The [`AssetLibrary`] resolves assets by name. It is the bridge used by
//! snapshot restore, which persists asset *names* rather than pointers.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Mesh / Material
// ---------------------------------------------------------------------------

/// Geometry metadata. Vertex data lives with the renderer; the core only
/// needs to know how the mesh is split into submeshes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Unique asset name.
    pub name: String,
    /// Number of submeshes, each drawn with its own material slot.
    pub submesh_count: u32,
    /// Whether the mesh is skinned to a skeleton (bone entities).
    pub skinned: bool,
}

impl Mesh {
    /// A mesh with a single submesh.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submesh_count: 1,
            skinned: false,
        }
    }

    /// Placeholder substituted for meshes missing at load time.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submesh_count: 0,
            skinned: false,
        }
    }
}

/// Surface description bound to a submesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Unique asset name.
    pub name: String,
    /// Linear RGBA base color.
    pub base_color: [f32; 4],
    /// Optional albedo texture name.
    pub albedo_texture: Option<String>,
}

impl Material {
    /// Name of the built-in fallback material.
    pub const DEFAULT_NAME: &'static str = "__default";

    /// A plain material with the given color.
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            base_color,
            albedo_texture: None,
        }
    }

    /// The visible magenta fallback used when a material is missing.
    pub fn fallback() -> Self {
        Self::new(Self::DEFAULT_NAME, [1.0, 0.0, 1.0, 1.0])
    }
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

/// A position keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionKey {
    /// Time in seconds from the start of the clip.
    pub time: f32,
    /// Local position at `time`.
    pub value: Vec3,
}

/// A rotation keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationKey {
    /// Time in seconds from the start of the clip.
    pub time: f32,
    /// Local rotation at `time`.
    pub value: Quat,
}

/// One animated node: independent position and rotation tracks.
///
/// Keyframe times are expected to be increasing; that is the producer's
/// responsibility and is not validated here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimationChannel {
    /// Name of the node (entity) this channel drives.
    pub target: String,
    pub position_keys: Vec<PositionKey>,
    pub rotation_keys: Vec<RotationKey>,
}

/// A named animation clip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Animation {
    /// Unique asset name.
    pub name: String,
    /// Clip length in seconds. Playback time wraps when it reaches this.
    pub duration: f32,
    /// Ordered channels. Animator cursors are indexed in the same order.
    pub channels: Vec<AnimationChannel>,
}

// ---------------------------------------------------------------------------
// AssetLibrary
// ---------------------------------------------------------------------------

/// Name-indexed store of shared assets.
#[derive(Debug, Clone)]
pub struct AssetLibrary {
    meshes: HashMap<String, Arc<Mesh>>,
    materials: HashMap<String, Arc<Material>>,
    animations: HashMap<String, Arc<Animation>>,
    default_material: Arc<Material>,
}

impl AssetLibrary {
    /// Create a library containing only the fallback material.
    pub fn new() -> Self {
        Self {
            meshes: HashMap::new(),
            materials: HashMap::new(),
            animations: HashMap::new(),
            default_material: Arc::new(Material::fallback()),
        }
    }

    /// Add a mesh, returning its shared handle. Replaces any mesh with the
    /// same name.
    pub fn add_mesh(&mut self, mesh: Mesh) -> Arc<Mesh> {
        let handle = Arc::new(mesh);
        self.meshes.insert(handle.name.clone(), Arc::clone(&handle));
        handle
    }

    /// Add a material, returning its shared handle.
    pub fn add_material(&mut self, material: Material) -> Arc<Material> {
        let handle = Arc::new(material);
        self.materials.insert(handle.name.clone(), Arc::clone(&handle));
        handle
    }

    /// Add an animation clip, returning its shared handle.
    pub fn add_animation(&mut self, animation: Animation) -> Arc<Animation> {
        let handle = Arc::new(animation);
        self.animations
            .insert(handle.name.clone(), Arc::clone(&handle));
        handle
    }

    pub fn mesh(&self, name: &str) -> Option<Arc<Mesh>> {
        self.meshes.get(name).cloned()
    }

    /// Look up a material. The fallback material is always resolvable under
    /// [`Material::DEFAULT_NAME`].
    pub fn material(&self, name: &str) -> Option<Arc<Material>> {
        if name == Material::DEFAULT_NAME {
            return Some(Arc::clone(&self.default_material));
        }
        self.materials.get(name).cloned()
    }

    pub fn animation(&self, name: &str) -> Option<Arc<Animation>> {
        self.animations.get(name).cloned()
    }

    /// The shared fallback material.
    pub fn default_material(&self) -> Arc<Material> {
        Arc::clone(&self.default_material)
    }

    /// Number of meshes, materials and animations, in that order.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.meshes.len(), self.materials.len(), self.animations.len())
    }
}

impl Default for AssetLibrary {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_returns_shared_handles() {
        let mut lib = AssetLibrary::new();
        let added = lib.add_mesh(Mesh::new("crate"));
        let fetched = lib.mesh("crate").unwrap();
        assert!(Arc::ptr_eq(&added, &fetched));
        assert!(lib.mesh("barrel").is_none());
    }

    #[test]
    fn default_material_always_resolves() {
        let lib = AssetLibrary::new();
        let fallback = lib.material(Material::DEFAULT_NAME).unwrap();
        assert!(Arc::ptr_eq(&fallback, &lib.default_material()));
        assert_eq!(lib.counts(), (0, 0, 0));
    }

    #[test]
    fn animation_serialization_roundtrip() {
        let clip = Animation {
            name: "wave".to_owned(),
            duration: 2.0,
            channels: vec![AnimationChannel {
                target: "arm".to_owned(),
                position_keys: vec![PositionKey {
                    time: 0.0,
                    value: Vec3::ZERO,
                }],
                rotation_keys: vec![RotationKey {
                    time: 1.0,
                    value: Quat::from_rotation_z(0.5),
                }],
            }],
        };
        let json = serde_json::to_string(&clip).unwrap();
        let back: Animation = serde_json::from_str(&json).unwrap();
        assert_eq!(clip, back);
    }
}
