//! Keyframed bone animation and the mixer that plays it on a node hierarchy.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::scene::{NodeId, Scene};

/// Position and rotation keyframes for a single named bone.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTrack {
    pub bone: String,
    pub times: Vec<f32>,
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
}

impl BoneTrack {
    /// Linear position / spherical rotation interpolation, clamped at both ends.
    /// `None` for an empty track or one whose keyframe arrays disagree in length.
    pub fn sample(&self, time: f32) -> Option<(Vec3, Quat)> {
        if !self.is_well_formed() {
            return None;
        }
        let last = self.times.len().checked_sub(1)?;
        let key = |i: usize| Some((*self.positions.get(i)?, *self.rotations.get(i)?));

        let next = self.times.partition_point(|&t| t <= time);
        if next == 0 {
            return key(0);
        }
        if next > last {
            return key(last);
        }

        let prev = next - 1;
        let span = self.times[next] - self.times[prev];
        if span <= f32::EPSILON {
            return key(prev);
        }
        let alpha = (time - self.times[prev]) / span;
        let (from_position, from_rotation) = key(prev)?;
        let (to_position, to_rotation) = key(next)?;
        Some((
            from_position.lerp(to_position, alpha),
            from_rotation.slerp(to_rotation, alpha),
        ))
    }

    fn is_well_formed(&self) -> bool {
        self.times.len() == self.positions.len() && self.times.len() == self.rotations.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<BoneTrack>,
}

impl AnimationClip {
    /// Builds a clip whose duration is the latest keyframe time of any track.
    /// Tracks with mismatched keyframe arrays are dropped.
    pub fn new(name: impl Into<String>, tracks: Vec<BoneTrack>) -> Self {
        let tracks: Vec<BoneTrack> = tracks.into_iter().filter(BoneTrack::is_well_formed).collect();
        let duration = tracks
            .iter()
            .filter_map(|track| track.times.last().copied())
            .fold(0.0_f32, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    Once,
    #[default]
    Repeat,
    PingPong,
}

/// Playback state of one clip inside an [`AnimationMixer`].
#[derive(Debug, Clone)]
pub struct AnimationAction {
    clip: Arc<AnimationClip>,
    pub time: f32,
    pub time_scale: f32,
    pub loop_mode: LoopMode,
    running: bool,
    bindings: Vec<Option<NodeId>>,
}

impl AnimationAction {
    fn new(clip: Arc<AnimationClip>, bindings: Vec<Option<NodeId>>) -> Self {
        Self {
            clip,
            time: 0.0,
            time_scale: 1.0,
            loop_mode: LoopMode::default(),
            running: false,
            bindings,
        }
    }

    pub fn clip(&self) -> &Arc<AnimationClip> {
        &self.clip
    }

    pub fn play(&mut self) -> &mut Self {
        self.running = true;
        self
    }

    /// Stops playback and rewinds to the start.
    pub fn stop(&mut self) -> &mut Self {
        self.running = false;
        self.time = 0.0;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn bound_tracks(&self) -> usize {
        self.bindings.iter().flatten().count()
    }

    fn advance(&mut self, dt: f32) {
        if !self.running {
            return;
        }
        let duration = self.clip.duration;
        if duration <= 0.0 {
            return;
        }

        self.time += dt * self.time_scale;
        match self.loop_mode {
            LoopMode::Once => {
                if self.time >= duration || self.time < 0.0 {
                    self.time = self.time.clamp(0.0, duration);
                    self.running = false;
                }
            }
            LoopMode::Repeat => self.time = self.time.rem_euclid(duration),
            LoopMode::PingPong => {
                let t = self.time.rem_euclid(duration * 2.0);
                self.time = if t > duration { duration * 2.0 - t } else { t };
            }
        }
    }
}

/// Plays clips on the bones found under a root node. Tracks are bound to
/// descendants by bone name when the action is first created.
#[derive(Debug)]
pub struct AnimationMixer {
    root: NodeId,
    actions: Vec<AnimationAction>,
}

impl AnimationMixer {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            actions: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the cached action for `clip`, creating and binding it if needed.
    pub fn clip_action(&mut self, clip: Arc<AnimationClip>, scene: &Scene) -> &mut AnimationAction {
        let existing = self
            .actions
            .iter()
            .position(|action| Arc::ptr_eq(&action.clip, &clip));

        let index = match existing {
            Some(index) => index,
            None => {
                let bindings = clip
                    .tracks
                    .iter()
                    .map(|track| scene.find_descendant(self.root, &track.bone))
                    .collect();
                self.actions.push(AnimationAction::new(clip, bindings));
                self.actions.len() - 1
            }
        };
        &mut self.actions[index]
    }

    /// Advances every running action and writes the sampled poses to the bones.
    pub fn update(&mut self, dt: f32, scene: &mut Scene) {
        for action in &mut self.actions {
            if !action.running {
                continue;
            }
            action.advance(dt);

            for (track, binding) in action.clip.tracks.iter().zip(&action.bindings) {
                let Some(node) = binding.and_then(|id| scene.node_mut(id)) else {
                    continue;
                };
                if let Some((position, rotation)) = track.sample(action.time) {
                    node.transform.translation = position;
                    node.transform.rotation = rotation;
                }
            }
        }
    }

    pub fn stop_all_action(&mut self) {
        for action in &mut self.actions {
            action.stop();
        }
    }

    /// Forgets every action bound to `root`. Returns how many were dropped.
    pub fn uncache_root(&mut self, root: NodeId) -> usize {
        if root != self.root {
            return 0;
        }
        let dropped = self.actions.len();
        self.actions.clear();
        dropped
    }

    pub fn is_playing(&self) -> bool {
        self.actions.iter().any(AnimationAction::is_running)
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}
