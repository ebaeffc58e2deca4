//! Biovision Hierarchy (BVH) motion capture parser.

use glam::{Quat, Vec3};

use crate::{
    animation::{AnimationClip, BoneTrack},
    Result, ViewerError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Xposition,
    Yposition,
    Zposition,
    Xrotation,
    Yrotation,
    Zrotation,
}

impl Channel {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "Xposition" => Self::Xposition,
            "Yposition" => Self::Yposition,
            "Zposition" => Self::Zposition,
            "Xrotation" => Self::Xrotation,
            "Yrotation" => Self::Yrotation,
            "Zrotation" => Self::Zrotation,
            _ => return None,
        })
    }

    pub fn axis(self) -> Vec3 {
        match self {
            Self::Xposition | Self::Xrotation => Vec3::X,
            Self::Yposition | Self::Yrotation => Vec3::Y,
            Self::Zposition | Self::Zrotation => Vec3::Z,
        }
    }

    pub fn is_rotation(self) -> bool {
        matches!(self, Self::Xrotation | Self::Yrotation | Self::Zrotation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BvhJoint {
    pub name: String,
    pub parent: Option<usize>,
    pub offset: Vec3,
    pub channels: Vec<Channel>,
    pub end_site: bool,
}

/// Joints in declaration order; the root is always index 0 and parents
/// always precede their children.
#[derive(Debug, Clone, PartialEq)]
pub struct BvhSkeleton {
    pub joints: Vec<BvhJoint>,
}

impl BvhSkeleton {
    pub fn channel_count(&self) -> usize {
        self.joints.iter().map(|joint| joint.channels.len()).sum()
    }

    pub fn root(&self) -> Option<&BvhJoint> {
        self.joints.first()
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.joints
            .iter()
            .enumerate()
            .filter(move |(_, joint)| joint.parent == Some(index))
            .map(|(i, _)| i)
    }

    pub fn depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut cursor = self.joints.get(index).and_then(|joint| joint.parent);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.joints.get(parent).and_then(|joint| joint.parent);
        }
        depth
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BvhMotion {
    pub frame_time: f32,
    pub frames: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BvhDocument {
    pub skeleton: BvhSkeleton,
    pub motion: BvhMotion,
}

impl BvhDocument {
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).document()
    }

    pub fn frame_count(&self) -> usize {
        self.motion.frames.len()
    }

    pub fn duration(&self) -> f32 {
        self.frame_count().saturating_sub(1) as f32 * self.motion.frame_time
    }

    /// One track per non end-site joint. Positions are the rest offset plus any
    /// translation channels; rotations compose the rotation channels in the
    /// order they were declared.
    pub fn to_clip(&self, name: impl Into<String>) -> AnimationClip {
        let times: Vec<f32> = (0..self.frame_count())
            .map(|i| i as f32 * self.motion.frame_time)
            .collect();

        let mut tracks = Vec::new();
        let mut first_channel = 0;
        for joint in &self.skeleton.joints {
            let channels = first_channel..first_channel + joint.channels.len();
            first_channel = channels.end;
            if joint.end_site {
                continue;
            }

            let mut positions = Vec::with_capacity(times.len());
            let mut rotations = Vec::with_capacity(times.len());
            for frame in &self.motion.frames {
                let mut position = joint.offset;
                let mut rotation = Quat::IDENTITY;
                for (channel, &value) in joint.channels.iter().zip(&frame[channels.clone()]) {
                    if channel.is_rotation() {
                        rotation *= Quat::from_axis_angle(channel.axis(), value.to_radians());
                    } else {
                        position += channel.axis() * value;
                    }
                }
                positions.push(position);
                rotations.push(rotation.normalize());
            }

            tracks.push(BoneTrack {
                bone: joint.name.clone(),
                times: times.clone(),
                positions,
                rotations,
            });
        }

        AnimationClip::new(name, tracks)
    }
}

/// Deeper hierarchies are rejected rather than recursed into.
const MAX_JOINT_DEPTH: usize = 256;

struct Parser<'a> {
    tokens: Vec<(usize, &'a str)>,
    cursor: usize,
    last_line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let tokens: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .flat_map(|(i, line)| line.split_whitespace().map(move |token| (i + 1, token)))
            .collect();
        let last_line = tokens.last().map_or(1, |&(line, _)| line);
        Self {
            tokens,
            cursor: 0,
            last_line,
        }
    }

    fn document(&mut self) -> Result<BvhDocument> {
        self.expect("HIERARCHY")?;
        self.expect("ROOT")?;
        let mut joints = Vec::new();
        self.joint(None, 0, &mut joints)?;
        let skeleton = BvhSkeleton { joints };

        self.expect("MOTION")?;
        let frame_count = self.frames_header()?;
        self.expect("Frame")?;
        self.expect("Time:")?;
        let frame_time = self.number()?;
        if frame_time <= 0.0 {
            return Err(self.error_here("frame time must be positive"));
        }

        let width = skeleton.channel_count();
        let remaining = self.tokens.len() - self.cursor;
        let needed = frame_count
            .checked_mul(width)
            .ok_or_else(|| self.error_here("frame count is too large"))?;
        if needed > remaining {
            return Err(self.error_here(&format!(
                "motion needs {needed} values for {frame_count} frames, found {remaining}"
            )));
        }
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let mut values = Vec::with_capacity(width);
            for _ in 0..width {
                values.push(self.number()?);
            }
            frames.push(values);
        }

        Ok(BvhDocument {
            skeleton,
            motion: BvhMotion { frame_time, frames },
        })
    }

    fn joint(&mut self, parent: Option<usize>, depth: usize, joints: &mut Vec<BvhJoint>) -> Result<()> {
        let (line, name) = self.next()?;
        if depth >= MAX_JOINT_DEPTH {
            return Err(ViewerError::parse(line, "joint hierarchy too deep"));
        }
        let index = joints.len();
        joints.push(BvhJoint {
            name: name.to_string(),
            parent,
            offset: Vec3::ZERO,
            channels: Vec::new(),
            end_site: false,
        });

        self.expect("{")?;
        self.expect("OFFSET")?;
        joints[index].offset = self.vec3()?;

        if self.peek() == Some("CHANNELS") {
            self.next()?;
            let count = self.number()? as usize;
            for _ in 0..count {
                let (line, token) = self.next()?;
                let channel = Channel::parse(token)
                    .ok_or_else(|| ViewerError::parse(line, format!("unknown channel `{token}`")))?;
                joints[index].channels.push(channel);
            }
        }

        loop {
            let (line, token) = self.next()?;
            match token {
                "JOINT" => self.joint(Some(index), depth + 1, joints)?,
                "End" => {
                    self.expect("Site")?;
                    self.expect("{")?;
                    self.expect("OFFSET")?;
                    let offset = self.vec3()?;
                    self.expect("}")?;
                    joints.push(BvhJoint {
                        name: format!("{}_end", joints[index].name),
                        parent: Some(index),
                        offset,
                        channels: Vec::new(),
                        end_site: true,
                    });
                }
                "}" => return Ok(()),
                other => {
                    return Err(ViewerError::parse(
                        line,
                        format!("unexpected `{other}` inside joint `{}`", joints[index].name),
                    ))
                }
            }
        }
    }

    fn frames_header(&mut self) -> Result<usize> {
        let (line, token) = self.next()?;
        match token {
            "Frames:" => {}
            "Frames" => self.expect(":")?,
            other => {
                return Err(ViewerError::parse(
                    line,
                    format!("expected `Frames:`, found `{other}`"),
                ))
            }
        }
        let (line, token) = self.next()?;
        token
            .parse()
            .map_err(|_| ViewerError::parse(line, format!("invalid frame count `{token}`")))
    }

    fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.number()?, self.number()?, self.number()?))
    }

    fn number(&mut self) -> Result<f32> {
        let (line, token) = self.next()?;
        token
            .parse()
            .map_err(|_| ViewerError::parse(line, format!("expected a number, found `{token}`")))
    }

    fn expect(&mut self, keyword: &str) -> Result<()> {
        let (line, token) = self.next()?;
        if token == keyword {
            Ok(())
        } else {
            Err(ViewerError::parse(
                line,
                format!("expected `{keyword}`, found `{token}`"),
            ))
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.cursor).map(|&(_, token)| token)
    }

    fn next(&mut self) -> Result<(usize, &'a str)> {
        let token = self
            .tokens
            .get(self.cursor)
            .copied()
            .ok_or_else(|| self.error_here("unexpected end of file"))?;
        self.cursor += 1;
        Ok(token)
    }

    fn error_here(&self, message: &str) -> ViewerError {
        let line = self
            .tokens
            .get(self.cursor.saturating_sub(1))
            .map_or(self.last_line, |&(line, _)| line);
        ViewerError::parse(line, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "HIERARCHY
ROOT Hips
{
  OFFSET 0.0 90.0 0.0
  CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation
  JOINT Spine
  {
    OFFSET 0.0 10.0 0.0
    CHANNELS 3 Zrotation Xrotation Yrotation
    End Site
    {
      OFFSET 0.0 5.0 0.0
    }
  }
}
MOTION
Frames: 3
Frame Time: 0.5
0 0 0 0 0 0 0 0 0
10 0 0 0 0 0 0 0 90
20 0 0 0 0 0 0 0 0
";

    #[test]
    fn parses_hierarchy_and_motion() {
        let doc = BvhDocument::parse(SAMPLE).unwrap();

        assert_eq!(doc.skeleton.joints.len(), 3);
        assert_eq!(doc.skeleton.channel_count(), 9);
        assert_eq!(doc.skeleton.root().unwrap().name, "Hips");
        assert_eq!(doc.skeleton.joints[1].parent, Some(0));
        assert!(doc.skeleton.joints[2].end_site);
        assert_eq!(doc.skeleton.depth(2), 2);
        assert_eq!(doc.skeleton.children(0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(doc.frame_count(), 3);
        assert_eq!(doc.duration(), 1.0);
    }

    #[test]
    fn clip_applies_offsets_and_rotation_channels() {
        let clip = BvhDocument::parse(SAMPLE).unwrap().to_clip("sample");

        assert_eq!(clip.tracks.len(), 2, "end sites carry no tracks");
        assert_eq!(clip.duration, 1.0);

        let hips = &clip.tracks[0];
        assert_eq!(hips.positions[1], Vec3::new(10.0, 90.0, 0.0));

        let spine = &clip.tracks[1];
        assert_eq!(spine.positions[0], Vec3::new(0.0, 10.0, 0.0));
        let turned = spine.rotations[1] * Vec3::X;
        assert!((turned - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn reports_line_of_unknown_channel() {
        let text = SAMPLE.replace("Zrotation Xrotation Yrotation\n    End", "Wrotation Xrotation Yrotation\n    End");
        let err = BvhDocument::parse(&text).unwrap_err();
        match err {
            ViewerError::Parse { line, message } => {
                assert_eq!(line, 9);
                assert!(message.contains("Wrotation"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_motion() {
        let text = SAMPLE.replace("Frames: 3", "Frames: 4");
        let err = BvhDocument::parse(&text).unwrap_err();
        assert!(err.to_string().contains("needs 36 values for 4 frames, found 27"), "{err}");
    }

    #[test]
    fn huge_frame_count_is_an_error() {
        let text = SAMPLE.replace("Frames: 3", "Frames: 1000000000000000000");
        let err = BvhDocument::parse(&text).unwrap_err();
        assert!(matches!(err, ViewerError::Parse { .. }), "{err:?}");

        let text = SAMPLE.replace("Frames: 3", &format!("Frames: {}", usize::MAX));
        let err = BvhDocument::parse(&text).unwrap_err();
        assert!(err.to_string().contains("frame count is too large"), "{err}");
    }

    #[test]
    fn rejects_deeply_nested_hierarchy() {
        let depth = 100_000;
        let mut text = String::from("HIERARCHY\nROOT j\n{\nOFFSET 0 0 0\n");
        for _ in 0..depth {
            text.push_str("JOINT j\n{\nOFFSET 0 0 0\n");
        }
        text.push_str(&"}\n".repeat(depth + 1));
        text.push_str("MOTION\nFrames: 0\nFrame Time: 0.1\n");

        let err = BvhDocument::parse(&text).unwrap_err();
        match err {
            ViewerError::Parse { line, message } => {
                assert_eq!(message, "joint hierarchy too deep");
                assert_eq!(line, 2 + 3 * MAX_JOINT_DEPTH);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn accepts_hierarchy_at_depth_limit() {
        let mut text = String::from("HIERARCHY\nROOT j\n{\nOFFSET 0 0 0\n");
        for _ in 1..MAX_JOINT_DEPTH {
            text.push_str("JOINT j\n{\nOFFSET 0 0 0\n");
        }
        text.push_str(&"}\n".repeat(MAX_JOINT_DEPTH));
        text.push_str("MOTION\nFrames: 0\nFrame Time: 0.1\n");

        let doc = BvhDocument::parse(&text).unwrap();
        assert_eq!(doc.skeleton.joints.len(), MAX_JOINT_DEPTH);
    }
}
