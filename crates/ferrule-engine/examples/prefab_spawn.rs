//! Headless prefab demo -- builds a turret prefab in its own group, stamps
//! copies into a scene, lets a few crates fall onto the floor and reports
//! what the renderer would draw.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example prefab_spawn -p ferrule-engine

use std::sync::Arc;

use ferrule_engine::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Prefab library
// ---------------------------------------------------------------------------

fn build_assets() -> AssetLibrary {
    let mut assets = AssetLibrary::new();
    assets.add_mesh(Mesh::new("turret_base"));
    assets.add_mesh(Mesh::new("turret_barrel"));
    assets.add_mesh(Mesh::new("crate"));
    assets.add_material(Material::new("steel", [0.6, 0.6, 0.65, 1.0]));
    assets.add_animation(Animation {
        name: "sweep".to_owned(),
        duration: 2.0,
        channels: vec![AnimationChannel {
            target: "barrel".to_owned(),
            position_keys: Vec::new(),
            rotation_keys: vec![
                RotationKey { time: 0.0, value: Quat::from_rotation_y(-0.6) },
                RotationKey { time: 1.0, value: Quat::from_rotation_y(0.6) },
                RotationKey { time: 2.0, value: Quat::from_rotation_y(-0.6) },
            ],
        }],
    });
    assets
}

/// A turret: static base, animated barrel, spot light on the barrel tip.
fn build_turret(prefabs: &mut EntityGroup, assets: &AssetLibrary) -> anyhow::Result<EntityId> {
    let steel = assets.material("steel").ok_or_else(|| anyhow::anyhow!("missing steel"))?;
    let base_mesh = assets.mesh("turret_base").ok_or_else(|| anyhow::anyhow!("missing base"))?;
    let barrel_mesh = assets.mesh("turret_barrel").ok_or_else(|| anyhow::anyhow!("missing barrel"))?;
    let sweep = assets.animation("sweep").ok_or_else(|| anyhow::anyhow!("missing sweep"))?;

    let base = prefabs.create_entity("turret");
    prefabs.insert(base, MeshRenderer::new(base_mesh).with_material(0, Arc::clone(&steel)))?;
    prefabs.insert(
        base,
        RigidBody::new(ColliderShape::Box { half_extents: Vec3::new(1.0, 0.5, 1.0) }, MotionType::Static),
    )?;
    prefabs.insert(base, Animator::new().with_animation(sweep))?;

    let barrel = prefabs.create_entity("barrel");
    prefabs.set_local_position(barrel, Vec3::new(0.0, 1.0, 0.0))?;
    prefabs.set_parent(barrel, base)?;
    prefabs.insert(barrel, MeshRenderer::new(barrel_mesh).with_material(0, steel))?;

    let tip = prefabs.create_entity("tip");
    prefabs.set_local_position(tip, Vec3::new(0.0, 0.0, -1.5))?;
    prefabs.set_parent(tip, barrel)?;
    prefabs.insert(tip, SpotLight::default())?;

    Ok(base)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let assets = build_assets();
    let mut prefabs = EntityGroup::new();
    let turret = build_turret(&mut prefabs, &assets)?;
    let template = SubtreeTemplate::capture(&prefabs, turret)
        .ok_or_else(|| anyhow::anyhow!("turret prefab vanished"))?;

    let crate_mesh = assets.mesh("crate").ok_or_else(|| anyhow::anyhow!("missing crate mesh"))?;
    let mut scene = EntityGroup::new();
    let floor = scene.create_entity("floor");
    scene.insert(
        floor,
        RigidBody::new(ColliderShape::Box { half_extents: Vec3::new(50.0, 0.5, 50.0) }, MotionType::Static),
    )?;
    for i in 0..4 {
        let crate_id = scene.create_entity(&format!("crate_{i}"));
        scene.set_local_position(crate_id, Vec3::new(i as f32 * 2.0, 3.0 + i as f32, 0.0))?;
        scene.insert(
            crate_id,
            RigidBody::new(ColliderShape::Box { half_extents: Vec3::splat(0.5) }, MotionType::Dynamic),
        )?;
        scene.insert(crate_id, MeshRenderer::new(Arc::clone(&crate_mesh)))?;
    }

    let mut frames = FrameLoop::new(scene, EngineConfig::default());
    for i in 0..3 {
        // Static bodies are placed once, so position the anchor first.
        let anchor = frames.group_mut().create_entity(&format!("emplacement_{i}"));
        frames
            .group_mut()
            .set_local_position(anchor, Vec3::new(-10.0 + i as f32 * 10.0, 1.0, -10.0))?;
        let copy = frames.instantiate(&template, anchor)?;
        play_animation(frames.group_mut(), copy, "sweep")?;
    }
    tracing::info!(
        entities = frames.group().entity_count(),
        bodies = frames.physics().body_count(),
        "scene ready"
    );

    let mut collisions = 0usize;
    for _ in 0..180 {
        collisions += frames.frame(1.0 / 60.0).collisions.len();
    }

    let draws = collect_draw_items(frames.group(), &assets.default_material());
    let lights = collect_lights(frames.group());
    tracing::info!(
        frames = frames.frame_count(),
        steps = frames.step_count(),
        collisions,
        draw_items = draws.len(),
        lights = lights.len(),
        hash = %frames.state_hash(),
        "simulation finished"
    );
    for light in &lights {
        tracing::info!(entity = %light.entity, position = ?light.position, direction = ?light.direction, "light");
    }
    Ok(())
}
