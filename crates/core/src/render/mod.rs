use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec4;

use crate::{
    camera::PerspectiveCamera,
    config::RendererConfig,
    scene::{NodeKind, Scene},
    Result, ViewerError,
};

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        Self(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Host region the render surface is mounted into.
pub trait RenderContainer {
    /// Logical size in CSS-style pixels.
    fn size(&self) -> (u32, u32);

    fn device_pixel_ratio(&self) -> f32 {
        1.0
    }

    fn attach_surface(&mut self, surface: SurfaceId);

    /// Returns `false` when the surface was not mounted here.
    fn detach_surface(&mut self, surface: SurfaceId) -> bool;
}

/// Container with no backing window, for the CLI and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessContainer {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    surfaces: Vec<SurfaceId>,
}

impl HeadlessContainer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_ratio: 1.0,
            surfaces: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn surfaces(&self) -> &[SurfaceId] {
        &self.surfaces
    }
}

impl RenderContainer for HeadlessContainer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn device_pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn attach_surface(&mut self, surface: SurfaceId) {
        if !self.surfaces.contains(&surface) {
            self.surfaces.push(surface);
        }
    }

    fn detach_surface(&mut self, surface: SurfaceId) -> bool {
        let before = self.surfaces.len();
        self.surfaces.retain(|&s| s != surface);
        before != self.surfaces.len()
    }
}

/// What a single frame submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub nodes_visited: usize,
    pub meshes: usize,
    pub triangles: usize,
    pub line_segments: usize,
    pub lights: usize,
    pub bones: usize,
    /// Nodes whose origin lies inside the view frustum.
    pub in_view: usize,
}

/// Headless renderer: walks the attached scene each frame and records what
/// would be submitted to the GPU.
#[derive(Debug)]
pub struct Renderer {
    surface: SurfaceId,
    width: u32,
    height: u32,
    pixel_ratio: f32,
    max_pixel_ratio: f32,
    antialias: bool,
    frames: u64,
    last_frame: FrameStats,
    disposed: bool,
}

impl Renderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            surface: SurfaceId::next(),
            width: 0,
            height: 0,
            pixel_ratio: 1.0,
            max_pixel_ratio: config.max_pixel_ratio.max(1.0),
            antialias: config.antialias,
            frames: 0,
            last_frame: FrameStats::default(),
            disposed: false,
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Device pixel ratio, capped at the configured maximum.
    pub fn set_pixel_ratio(&mut self, device_ratio: f32) {
        self.pixel_ratio = device_ratio.clamp(1.0, self.max_pixel_ratio);
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn drawing_buffer_size(&self) -> (u32, u32) {
        (
            (self.width as f32 * self.pixel_ratio).round() as u32,
            (self.height as f32 * self.pixel_ratio).round() as u32,
        )
    }

    pub fn antialias(&self) -> bool {
        self.antialias
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<FrameStats> {
        if self.disposed {
            return Err(ViewerError::msg("render called on a disposed renderer"));
        }

        let view_projection = camera.view_projection();
        let mut stats = FrameStats::default();

        for id in scene.attached_nodes() {
            let Some(node) = scene.node(id) else {
                continue;
            };
            stats.nodes_visited += 1;

            if let Some(origin) = scene.world_position(id) {
                let clip = view_projection * Vec4::new(origin.x, origin.y, origin.z, 1.0);
                if clip.w > 0.0 && clip.x.abs() <= clip.w && clip.y.abs() <= clip.w && clip.z.abs() <= clip.w {
                    stats.in_view += 1;
                }
            }

            match &node.kind {
                NodeKind::Mesh { geometry, .. } => {
                    stats.meshes += 1;
                    stats.triangles += scene
                        .geometry(*geometry)
                        .map_or(0, |geometry| geometry.primitive_count());
                }
                NodeKind::SkeletonHelper(helper) => {
                    stats.line_segments += scene.skeleton_segments(helper).len();
                }
                NodeKind::Grid(grid) => stats.line_segments += 2 * (grid.divisions as usize + 1),
                NodeKind::Axes { .. } => stats.line_segments += 3,
                NodeKind::Light(_) => stats.lights += 1,
                NodeKind::Bone => stats.bones += 1,
                NodeKind::Group => {}
            }
        }

        self.frames += 1;
        self.last_frame = stats;
        Ok(stats)
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
    }
}
