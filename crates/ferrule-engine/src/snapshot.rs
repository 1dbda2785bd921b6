//! Engine-level snapshot and restore with BLAKE3 hashing.
//!
//! An [`EngineSnapshot`] is the group snapshot plus the frame loop's
//! counters and configuration, sealed with a BLAKE3 hex digest of the
//! serialized state. The digest is recomputed and compared on restore.
//!
//! # Usage
//!
//! ```
//! use ferrule_engine::prelude::*;
//!
//! let mut group = EntityGroup::new();
//! group.create_entity("anchor");
//! let mut frames = FrameLoop::new(group, EngineConfig::default());
//! frames.run_frames(10, 1.0 / 60.0);
//!
//! let snapshot = frames.capture_snapshot();
//! assert_eq!(snapshot.frame_counter, 10);
//! assert_eq!(snapshot.hash.len(), 64);
//!
//! frames.run_frames(10, 1.0 / 60.0);
//! frames.restore_from_snapshot(&snapshot, &AssetLibrary::new()).unwrap();
//! assert_eq!(frames.frame_count(), 10);
//! ```
//!
//! # What Is NOT Serialized
//!
//! - **Systems** (fn pointers): retained when restoring on the same
//!   `FrameLoop`, otherwise the caller re-registers them.
//! - **Physics world** (rapier3d state): rebuilt from the restored
//!   `RigidBody` components at their restored world poses. Velocities start
//!   at zero.
//! - **Accumulated frame time** and diagnostics.

use anyhow::Context;
use ferrule_ecs::asset::AssetLibrary;
use ferrule_ecs::snapshot::GroupSnapshot;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::tick::FrameLoop;

// ---------------------------------------------------------------------------
// EngineSnapshot
// ---------------------------------------------------------------------------

/// A serializable snapshot of a [`FrameLoop`]'s simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub group: GroupSnapshot,
    pub frame_counter: u64,
    pub step_counter: u64,
    pub config: EngineConfig,
    /// BLAKE3 hex digest (64 lowercase hex chars) of everything above.
    pub hash: String,
}

impl EngineSnapshot {
    /// Assemble a snapshot and seal it with its hash.
    pub fn new(group: GroupSnapshot, frame_counter: u64, step_counter: u64, config: EngineConfig) -> Self {
        let hash = compute_hash(&group, frame_counter, step_counter, &config);
        Self {
            group,
            frame_counter,
            step_counter,
            config,
            hash,
        }
    }

    /// Whether `hash` matches the recomputed digest.
    pub fn verify(&self) -> bool {
        compute_hash(&self.group, self.frame_counter, self.step_counter, &self.config) == self.hash
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to serialize engine snapshot")
    }

    /// Parse a snapshot. The hash is not checked here; restore checks it.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid snapshot document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse engine snapshot")
    }
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest over a canonical JSON encoding of the state. Group
/// snapshot lists are sorted by id, so equal states hash equally.
fn compute_hash(
    group: &GroupSnapshot,
    frame_counter: u64,
    step_counter: u64,
    config: &EngineConfig,
) -> String {
    #[derive(Serialize)]
    struct HashableState<'a> {
        group: &'a GroupSnapshot,
        frame_counter: u64,
        step_counter: u64,
        config: &'a EngineConfig,
    }

    let hashable = HashableState {
        group,
        frame_counter,
        step_counter,
        config,
    };

    let json_bytes = serde_json::to_vec(&hashable)
        .expect("EngineSnapshot state should always be JSON-serializable");

    blake3::hash(&json_bytes).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// FrameLoop snapshot/restore methods
// ---------------------------------------------------------------------------

impl FrameLoop {
    pub fn capture_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::new(
            self.group.capture_snapshot(),
            self.frame_counter,
            self.step_counter,
            self.config.clone(),
        )
    }

    /// Replace the simulation state with `snapshot`, resolving asset names
    /// through `assets`.
    ///
    /// Nothing is modified unless every check passes. Registered systems are
    /// kept; the physics world is rebuilt and the accumulator cleared.
    ///
    /// # Errors
    ///
    /// - hash mismatch (corruption or tampering);
    /// - invalid configuration;
    /// - an inconsistent group snapshot
    ///   ([`EcsError::SnapshotInvalid`](ferrule_ecs::EcsError::SnapshotInvalid)).
    pub fn restore_from_snapshot(
        &mut self,
        snapshot: &EngineSnapshot,
        assets: &AssetLibrary,
    ) -> anyhow::Result<()> {
        let expected_hash = compute_hash(
            &snapshot.group,
            snapshot.frame_counter,
            snapshot.step_counter,
            &snapshot.config,
        );
        if expected_hash != snapshot.hash {
            anyhow::bail!(
                "snapshot hash mismatch: recorded {} but recomputed {}. \
                 The snapshot may be corrupted or tampered with.",
                snapshot.hash,
                expected_hash
            );
        }
        snapshot
            .config
            .validate()
            .context("snapshot carries an invalid engine config")?;

        let group = ferrule_ecs::group::EntityGroup::restore_snapshot(&snapshot.group, assets)
            .context("failed to restore entity group from snapshot")?;

        self.group = group;
        self.frame_counter = snapshot.frame_counter;
        self.step_counter = snapshot.step_counter;
        if self.config != snapshot.config {
            tracing::info!("engine config replaced by snapshot config");
            self.config = snapshot.config.clone();
        }
        self.stepper = crate::physics::FixedStepper::from_config(&self.config);
        self.physics = crate::physics::PhysicsWorld::from_config(&self.config);
        self.rejected_bodies.clear();
        self.sync_bodies();

        tracing::debug!(
            frame = self.frame_counter,
            entities = self.group.entity_count(),
            bodies = self.physics.body_count(),
            "engine restored from snapshot"
        );
        Ok(())
    }

    /// BLAKE3 digest of the current state, equal to
    /// `capture_snapshot().hash`.
    pub fn state_hash(&self) -> String {
        let group = self.group.capture_snapshot();
        compute_hash(&group, self.frame_counter, self.step_counter, &self.config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_ecs::components::{ColliderShape, MotionType, RigidBody};
    use ferrule_ecs::group::EntityGroup;
    use glam::Vec3;

    fn falling_ball() -> FrameLoop {
        let mut group = EntityGroup::new();
        let ball = group.create_entity("ball");
        group.set_local_position(ball, Vec3::new(0.0, 10.0, 0.0)).unwrap();
        group
            .insert(ball, RigidBody::new(ColliderShape::Sphere { radius: 0.5 }, MotionType::Dynamic))
            .unwrap();
        FrameLoop::new(group, EngineConfig::default())
    }

    #[test]
    fn hash_is_stable_and_changes_with_state() {
        let mut frames = falling_ball();
        let a = frames.state_hash();
        assert_eq!(a, frames.state_hash());
        assert_eq!(a, frames.capture_snapshot().hash);
        frames.frame(1.0 / 60.0);
        assert_ne!(a, frames.state_hash());
    }

    #[test]
    fn tampered_snapshot_is_rejected() {
        let mut frames = falling_ball();
        let mut snapshot = frames.capture_snapshot();
        snapshot.frame_counter += 1;
        assert!(!snapshot.verify());

        frames.run_frames(5, 1.0 / 60.0);
        let err = frames
            .restore_from_snapshot(&snapshot, &AssetLibrary::new())
            .unwrap_err();
        assert!(err.to_string().contains("hash mismatch"));
        assert_eq!(frames.frame_count(), 5);
    }

    #[test]
    fn restore_rebuilds_physics() {
        let mut frames = falling_ball();
        let snapshot = frames.capture_snapshot();
        frames.run_frames(20, 1.0 / 60.0);

        frames
            .restore_from_snapshot(&snapshot, &AssetLibrary::new())
            .unwrap();
        let ball = frames.group().find_by_name("ball").unwrap();
        assert_eq!(frames.physics().body_count(), 1);
        assert!((frames.group().position(ball).unwrap().y - 10.0).abs() < 1e-5);
        assert_eq!(frames.state_hash(), snapshot.hash);
    }

    #[test]
    fn json_round_trip_keeps_hash_valid() {
        let frames = falling_ball();
        let json = frames.capture_snapshot().to_json().unwrap();
        let parsed = EngineSnapshot::from_json(&json).unwrap();
        assert!(parsed.verify());
    }
}
