//! Node arena scene graph with explicitly released geometry and material
//! resources.

use glam::{Mat4, Quat, Vec3};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    pub struct NodeId;
    pub struct GeometryId;
    pub struct MaterialId;
}

/// Linear RGB colour in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub Vec3);

impl Color {
    pub const WHITE: Self = Self(Vec3::ONE);

    pub fn from_hex(hex: u32) -> Self {
        let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
        Self(Vec3::new(channel(16), channel(8), channel(0)))
    }

    pub fn to_hex(self) -> u32 {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.0.x) << 16) | (channel(self.0.y) << 8) | channel(self.0.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Sky colour comes from [`Light::color`].
    Hemisphere { ground: Color },
    Directional,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Color,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHelper {
    pub size: f32,
    pub divisions: u32,
    pub center_color: Color,
    pub line_color: Color,
}

/// Line visualisation of a bone hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonHelper {
    pub bones: Vec<NodeId>,
    pub geometry: GeometryId,
    pub materials: Vec<MaterialId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh {
        geometry: GeometryId,
        materials: Vec<MaterialId>,
    },
    Bone,
    SkeletonHelper(SkeletonHelper),
    Light(Light),
    Grid(GridHelper),
    Axes {
        size: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub transform: Transform,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: Transform::IDENTITY,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    Lines,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub label: String,
    pub topology: Topology,
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Rectangle in the XY plane centred on the origin.
    pub fn plane(width: f32, height: f32) -> Self {
        let (hw, hh) = (width * 0.5, height * 0.5);
        Self {
            label: "plane".to_string(),
            topology: Topology::Triangles,
            positions: vec![
                Vec3::new(-hw, hh, 0.0),
                Vec3::new(hw, hh, 0.0),
                Vec3::new(-hw, -hh, 0.0),
                Vec3::new(hw, -hh, 0.0),
            ],
            indices: vec![0, 2, 1, 2, 3, 1],
        }
    }

    pub fn lines(label: impl Into<String>, positions: Vec<Vec3>) -> Self {
        let indices = (0..positions.len() as u32).collect();
        Self {
            label: label.into(),
            topology: Topology::Lines,
            positions,
            indices,
        }
    }

    pub fn triangles(label: impl Into<String>, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            label: label.into(),
            topology: Topology::Triangles,
            positions,
            indices,
        }
    }

    pub fn primitive_count(&self) -> usize {
        match self.topology {
            Topology::Triangles => self.indices.len() / 3,
            Topology::Lines => self.indices.len() / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Phong,
    Basic,
    Line,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub color: Color,
    pub opacity: f32,
    pub depth_write: bool,
    pub shininess: f32,
}

impl Material {
    pub fn new(name: impl Into<String>, kind: MaterialKind, color: Color) -> Self {
        Self {
            name: name.into(),
            kind,
            color,
            opacity: 1.0,
            depth_write: true,
            shininess: 30.0,
        }
    }

    pub fn transparent(&self) -> bool {
        self.opacity < 1.0
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

#[derive(Debug)]
pub struct Scene {
    pub background: Color,
    nodes: SlotMap<NodeId, Node>,
    roots: Vec<NodeId>,
    geometries: SlotMap<GeometryId, Geometry>,
    materials: SlotMap<MaterialId, Material>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Color::from_hex(0x000000))
    }
}

impl Scene {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
        }
    }

    /// Inserts a node without attaching it anywhere.
    pub fn spawn(&mut self, node: Node) -> NodeId {
        let mut node = node;
        node.parent = None;
        node.children.clear();
        self.nodes.insert(node)
    }

    /// Attaches a node directly under the scene root, detaching it first.
    pub fn add(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        self.detach(id);
        self.roots.push(id);
        true
    }

    /// Reparents `child` under `parent`. Refuses to create a cycle.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
            return false;
        }
        if self.ancestors(parent).any(|ancestor| ancestor == child) {
            return false;
        }

        self.detach(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
        true
    }

    /// Removes the node from its parent (or the root list). The subtree stays alive.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes.get(id).map(|node| node.parent) else {
            return false;
        };

        match parent {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children.retain(|&c| c != id);
                }
                if let Some(node) = self.nodes.get_mut(id) {
                    node.parent = None;
                }
                true
            }
            None => {
                let before = self.roots.len();
                self.roots.retain(|&r| r != id);
                before != self.roots.len()
            }
        }
    }

    /// Detaches and deletes the node and all of its descendants. Geometry and
    /// materials referenced by them must be released separately.
    pub fn despawn(&mut self, id: NodeId) -> usize {
        if !self.nodes.contains_key(id) {
            return 0;
        }
        self.detach(id);
        let subtree = self.descendants(id);
        for node in &subtree {
            self.nodes.remove(*node);
        }
        subtree.len()
    }

    /// Removes every node. Resource arenas are left untouched.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn insert_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometries.insert(geometry)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(id)
    }

    pub fn geometry_mut(&mut self, id: GeometryId) -> Option<&mut Geometry> {
        self.geometries.get_mut(id)
    }

    pub fn dispose_geometry(&mut self, id: GeometryId) -> bool {
        self.geometries.remove(id).is_some()
    }

    pub fn live_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn insert_material(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn dispose_material(&mut self, id: MaterialId) -> bool {
        self.materials.remove(id).is_some()
    }

    pub fn live_materials(&self) -> usize {
        self.materials.len()
    }

    /// Walks from the node's parent up to the top of its tree.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.nodes.get(id).and_then(|node| node.parent);
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.nodes.get(current).and_then(|node| node.parent);
            Some(current)
        })
    }

    /// The node itself followed by its descendants, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Whether the node is reachable from the scene root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        let top = self.ancestors(id).last().unwrap_or(id);
        self.roots.contains(&top)
    }

    pub fn attached_nodes(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|&root| self.descendants(root))
            .collect()
    }

    pub fn count_attached(&self, mut predicate: impl FnMut(&Node) -> bool) -> usize {
        self.attached_nodes()
            .into_iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| predicate(node))
            .count()
    }

    pub fn find_descendant(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|&id| self.nodes.get(id).is_some_and(|node| node.name == name))
    }

    pub fn world_matrix(&self, id: NodeId) -> Option<Mat4> {
        let node = self.nodes.get(id)?;
        let mut matrix = node.transform.matrix();
        for ancestor in self.ancestors(id) {
            if let Some(parent) = self.nodes.get(ancestor) {
                matrix = parent.transform.matrix() * matrix;
            }
        }
        Some(matrix)
    }

    pub fn world_position(&self, id: NodeId) -> Option<Vec3> {
        self.world_matrix(id)
            .map(|matrix| matrix.transform_point3(Vec3::ZERO))
    }

    /// One segment per bone whose parent is also a bone, in world space.
    pub fn skeleton_segments(&self, helper: &SkeletonHelper) -> Vec<(Vec3, Vec3)> {
        helper
            .bones
            .iter()
            .filter_map(|&bone| {
                let parent = self.nodes.get(bone)?.parent?;
                if !matches!(self.nodes.get(parent)?.kind, NodeKind::Bone) {
                    return None;
                }
                Some((self.world_position(parent)?, self.world_position(bone)?))
            })
            .collect()
    }

    /// World-space bounds of the node and everything below it.
    pub fn bounding_box(&self, id: NodeId) -> Option<Aabb> {
        let mut bounds: Option<Aabb> = None;
        let mut include = |point: Vec3| match bounds.as_mut() {
            Some(aabb) => aabb.expand(point),
            None => bounds = Some(Aabb::from_point(point)),
        };

        for current in self.descendants(id) {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            let Some(world) = self.world_matrix(current) else {
                continue;
            };

            match &node.kind {
                NodeKind::Mesh { geometry, .. } => {
                    if let Some(geometry) = self.geometries.get(*geometry) {
                        for &p in &geometry.positions {
                            include(world.transform_point3(p));
                        }
                    }
                }
                NodeKind::Bone => include(world.transform_point3(Vec3::ZERO)),
                NodeKind::SkeletonHelper(helper) => {
                    for &bone in &helper.bones {
                        if let Some(p) = self.world_position(bone) {
                            include(p);
                        }
                    }
                }
                NodeKind::Axes { size } => {
                    include(world.transform_point3(Vec3::ZERO));
                    include(world.transform_point3(Vec3::splat(*size)));
                }
                NodeKind::Grid(grid) => {
                    let half = grid.size * 0.5;
                    include(world.transform_point3(Vec3::new(-half, 0.0, -half)));
                    include(world.transform_point3(Vec3::new(half, 0.0, half)));
                }
                NodeKind::Group | NodeKind::Light(_) => {}
            }
        }

        bounds
    }
}
