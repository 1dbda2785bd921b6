//! Keyframe animation sampling.
//!
//! Once per frame the [`AnimationSampler`] advances every playing
//! [`Animator`] and writes the sampled local position/rotation of each
//! channel into the transform of the channel's target entity.
//!
//! Each channel carries two independent tracks (position and rotation) with
//! their own "next keyframe" cursor. For a track the sampler:
//!
//! 1. moves the cursor forward past every keyframe whose time has been
//!    reached, wrapping to the first keyframe after the last one;
//! 2. interpolates from the previous keyframe (or, at cursor 0, from the
//!    target's current local pose) toward the cursor keyframe, with
//!    `t = (time - prev_time) / segment` clamped to `[0, 1]`. A zero-length
//!    segment snaps to the cursor keyframe.
//!
//! A track whose last keyframe comes before the clip duration does not hold
//! that key until the wrap: on the first frame past it the cursor is already
//! back at 0, so the pose moves toward the first keyframe (snapping to it when
//! that key sits at time 0) for the rest of the clip.
//!
//! When playback time reaches the clip duration it wraps to 0 and every
//! cursor is reset with it, so tracks of different lengths cannot drift
//! apart across loops.

use std::sync::Arc;

use ferrule_ecs::asset::{Animation, PositionKey, RotationKey};
use ferrule_ecs::components::Animator;
use ferrule_ecs::entity::EntityId;
use ferrule_ecs::group::EntityGroup;
use ferrule_ecs::EcsError;
use glam::{Quat, Vec3};

// ---------------------------------------------------------------------------
// Keyframe tracks
// ---------------------------------------------------------------------------

/// Common view of position and rotation keyframes.
trait Keyframe: Copy {
    type Value: Copy;

    fn time(&self) -> f32;

    fn value(&self) -> Self::Value;
}

impl Keyframe for PositionKey {
    type Value = Vec3;

    fn time(&self) -> f32 {
        self.time
    }

    fn value(&self) -> Vec3 {
        self.value
    }
}

impl Keyframe for RotationKey {
    type Value = Quat;

    fn time(&self) -> f32 {
        self.time
    }

    fn value(&self) -> Quat {
        self.value
    }
}

/// The piece of a track active at the current playback time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment<V> {
    /// Previous keyframe value, or `None` to start from the current pose.
    from: Option<V>,
    to: V,
    t: f32,
}

/// Advance `cursor` to the keyframe that follows `time` and return the
/// segment to interpolate. `None` for an empty track.
fn step_track<K: Keyframe>(keys: &[K], cursor: &mut usize, time: f32) -> Option<Segment<K::Value>> {
    if keys.is_empty() {
        return None;
    }
    if *cursor >= keys.len() {
        *cursor = 0;
    }
    while time >= keys[*cursor].time() {
        *cursor += 1;
        if *cursor == keys.len() {
            // Past the last keyframe: loop back and snap toward the first.
            *cursor = 0;
            break;
        }
    }

    let target = keys[*cursor];
    let (from, prev_time) = if *cursor == 0 {
        (None, 0.0)
    } else {
        let prev = keys[*cursor - 1];
        (Some(prev.value()), prev.time())
    };
    let segment = target.time() - prev_time;
    let t = if segment > 0.0 {
        (time - prev_time) / segment
    } else {
        1.0
    };
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 1.0 };

    Some(Segment {
        from,
        to: target.value(),
        t,
    })
}

// ---------------------------------------------------------------------------
// AnimationSampler
// ---------------------------------------------------------------------------

/// Counters from one [`AnimationSampler::sample`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleReport {
    /// Animators that advanced this frame.
    pub animators: usize,
    /// Channels whose pose was written to a transform.
    pub channels_written: usize,
    /// Channels skipped because their target is unbound or has no transform.
    pub channels_skipped: usize,
    /// Animators whose playback time wrapped this frame.
    pub loops: usize,
}

/// One channel's sampled pose, computed while the animator is borrowed and
/// applied once the borrow ends.
#[derive(Debug, Clone, Copy)]
struct PendingPose {
    target: EntityId,
    position: Option<Segment<Vec3>>,
    rotation: Option<Segment<Quat>>,
}

/// Drives every [`Animator`] in a group.
///
/// Holds only scratch storage reused between frames.
#[derive(Debug, Default)]
pub struct AnimationSampler {
    animators: Vec<EntityId>,
    pending: Vec<PendingPose>,
}

impl AnimationSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance every playing animator by `dt` seconds (scaled by its speed)
    /// and write the sampled poses into the target transforms.
    ///
    /// Animators are visited in ascending entity id order.
    pub fn sample(&mut self, group: &mut EntityGroup, dt: f32) -> SampleReport {
        let mut report = SampleReport::default();

        self.animators.clear();
        self.animators
            .extend(group.iter::<Animator>().map(|(id, _)| id));
        self.animators.sort_unstable();

        for i in 0..self.animators.len() {
            let id = self.animators[i];
            self.pending.clear();

            let Some(animator) = group.get_mut::<Animator>(id) else {
                continue;
            };
            if !animator.playing {
                continue;
            }
            let Some(clip) = animator.current.clone() else {
                continue;
            };
            report.animators += 1;
            let looped = advance(animator, &clip, dt, &mut self.pending);
            if looped {
                report.loops += 1;
            }

            for pose in &self.pending {
                if apply_pose(group, pose) {
                    report.channels_written += 1;
                } else {
                    tracing::trace!(animator = %id, target = %pose.target, "channel target unbound -- skipped");
                    report.channels_skipped += 1;
                }
            }
        }

        tracing::trace!(
            animators = report.animators,
            written = report.channels_written,
            skipped = report.channels_skipped,
            "animations sampled"
        );
        report
    }
}

/// Advance one animator's time and cursors, queueing a pose per channel.
/// Returns whether playback time wrapped.
fn advance(animator: &mut Animator, clip: &Animation, dt: f32, out: &mut Vec<PendingPose>) -> bool {
    let step = dt * animator.speed.max(0.0);
    if step.is_finite() {
        animator.time += step;
    }

    let channels = clip.channels.len();
    animator.position_cursors.resize(channels, 0);
    animator.rotation_cursors.resize(channels, 0);
    animator.channel_targets.resize(channels, EntityId::INVALID);

    for (c, channel) in clip.channels.iter().enumerate() {
        let position = step_track(
            &channel.position_keys,
            &mut animator.position_cursors[c],
            animator.time,
        );
        let rotation = step_track(
            &channel.rotation_keys,
            &mut animator.rotation_cursors[c],
            animator.time,
        );
        if position.is_some() || rotation.is_some() {
            out.push(PendingPose {
                target: animator.channel_targets[c],
                position,
                rotation,
            });
        }
    }

    if clip.duration <= 0.0 || animator.time >= clip.duration {
        animator.rewind();
        return true;
    }
    false
}

/// Interpolate from the target's current local pose where needed and write
/// the result. Returns `false` if the target cannot receive it.
fn apply_pose(group: &mut EntityGroup, pose: &PendingPose) -> bool {
    let target = pose.target;
    let (Some(current_pos), Some(current_rot)) =
        (group.local_position(target), group.local_rotation(target))
    else {
        return false;
    };

    if let Some(seg) = pose.position {
        let from = seg.from.unwrap_or(current_pos);
        let value = from.lerp(seg.to, seg.t);
        if group.set_local_position(target, value).is_err() {
            return false;
        }
    }
    if let Some(seg) = pose.rotation {
        let from = seg.from.unwrap_or(current_rot);
        let value = from.slerp(seg.to, seg.t).normalize();
        if group.set_local_rotation(target, value).is_err() {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Playback control
// ---------------------------------------------------------------------------

/// Switch `entity`'s animator to the clip registered as `name`, resetting
/// time and cursors, then rebind channel targets by name.
///
/// Returns the number of channels bound to an entity.
///
/// # Errors
///
/// [`EcsError::AnimationNotFound`] if the entity has no animator or the
/// animator has no clip called `name`. Nothing changes in that case.
pub fn play_animation(group: &mut EntityGroup, entity: EntityId, name: &str) -> Result<usize, EcsError> {
    let animator = group
        .get_mut::<Animator>(entity)
        .ok_or_else(|| EcsError::AnimationNotFound {
            entity,
            name: name.to_owned(),
        })?;
    animator.play(entity, name)?;
    tracing::debug!(entity = %entity, animation = name, "animation started");
    Ok(bind_channels(group, entity))
}

/// Resolve each channel of the current clip to an entity by name.
///
/// Targets are searched in the subtree of the animator's `root_entity`
/// (or of the animator's own entity when no root is set), first match in
/// pre-order. Unresolved channels are bound to [`EntityId::INVALID`] and
/// skipped during sampling. Returns the number of bound channels.
pub fn bind_channels(group: &mut EntityGroup, entity: EntityId) -> usize {
    let Some(animator) = group.get::<Animator>(entity) else {
        return 0;
    };
    let Some(clip) = animator.current.clone() else {
        return 0;
    };
    let root = if animator.root_entity.is_valid() {
        animator.root_entity
    } else {
        entity
    };

    let candidates = group.subtree(root);
    let targets: Vec<EntityId> = clip
        .channels
        .iter()
        .map(|channel| {
            candidates
                .iter()
                .copied()
                .find(|&id| group.name(id) == Some(channel.target.as_str()))
                .unwrap_or_else(|| {
                    tracing::trace!(
                        entity = %entity,
                        channel = %channel.target,
                        "no entity matches animation channel"
                    );
                    EntityId::INVALID
                })
        })
        .collect();

    let bound = targets.iter().filter(|id| id.is_valid()).count();
    if let Some(animator) = group.get_mut::<Animator>(entity) {
        animator.channel_targets = targets;
    }
    bound
}

/// The clip `entity` is currently playing.
pub fn current_animation(group: &EntityGroup, entity: EntityId) -> Option<Arc<Animation>> {
    group.get::<Animator>(entity)?.current.clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
