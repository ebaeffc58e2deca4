//! Background resource loading and construction of the scene content it
//! produces: the animated subject and the static props.
//!
//! Loads run as [`LoadJob`]s handed to a [`LoadDispatcher`]. Jobs never touch
//! the scene; they report back through a channel and the session applies the
//! results on its own thread, after checking that the request is still current.

use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex, MutexGuard,
    },
    thread,
};

use glam::{Quat, Vec3};

use crate::{
    animation::{AnimationClip, AnimationMixer},
    assets::{LoadProgress, PropDescriptor, ResourceFetcher},
    bvh::BvhDocument,
    camera::{OrbitControls, PerspectiveCamera},
    obj::{MtlLibrary, ObjModel},
    scene::{
        Color, Geometry, Material, MaterialKind, Node, NodeId, NodeKind, Scene, SkeletonHelper,
        Transform,
    },
    Result, ViewerError,
};

/// Identifies one load request. Cloning shares the cancel flag.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl LoadTicket {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    Subject { path: String },
    Prop(PropDescriptor),
}

impl LoadRequest {
    pub fn path(&self) -> &str {
        match self {
            Self::Subject { path } => path,
            Self::Prop(prop) => &prop.obj,
        }
    }
}

#[derive(Debug)]
pub struct LoadedMotion {
    pub document: BvhDocument,
    pub clip: Arc<AnimationClip>,
}

#[derive(Debug)]
pub struct LoadedProp {
    pub descriptor: PropDescriptor,
    pub model: ObjModel,
    pub materials: MtlLibrary,
}

#[derive(Debug)]
pub enum LoadPayload {
    Subject(LoadedMotion),
    Prop(LoadedProp),
}

#[derive(Debug)]
pub enum LoadEvent {
    Progress {
        generation: u64,
        path: String,
        progress: LoadProgress,
    },
    Finished {
        ticket: LoadTicket,
        request: LoadRequest,
        result: Result<LoadPayload>,
    },
}

/// A fetch-and-parse unit of work. Runs on whatever thread the dispatcher picks.
pub struct LoadJob {
    ticket: LoadTicket,
    request: LoadRequest,
    fetcher: Arc<dyn ResourceFetcher>,
    reply: mpsc::Sender<LoadEvent>,
}

impl LoadJob {
    pub fn new(
        ticket: LoadTicket,
        request: LoadRequest,
        fetcher: Arc<dyn ResourceFetcher>,
        reply: mpsc::Sender<LoadEvent>,
    ) -> Self {
        Self {
            ticket,
            request,
            fetcher,
            reply,
        }
    }

    pub fn ticket(&self) -> &LoadTicket {
        &self.ticket
    }

    pub fn request(&self) -> &LoadRequest {
        &self.request
    }

    /// Runs the job and always reports completion, even if fetching or
    /// parsing panics.
    pub fn run(self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute())).unwrap_or_else(|payload| {
            Err(ViewerError::msg(format!("loader panicked: {}", panic_message(payload.as_ref())))
                .with_path(self.request.path()))
        });
        let LoadJob {
            ticket,
            request,
            reply,
            ..
        } = self;
        // The session may already be gone; nothing is waiting for the result then.
        let _ = reply.send(LoadEvent::Finished {
            ticket,
            request,
            result,
        });
    }

    fn execute(&self) -> Result<LoadPayload> {
        match &self.request {
            LoadRequest::Subject { path } => self.load_motion(path).map(LoadPayload::Subject),
            LoadRequest::Prop(prop) => self.load_prop(prop).map(LoadPayload::Prop),
        }
    }

    fn load_motion(&self, path: &str) -> Result<LoadedMotion> {
        let text = self.fetch_text(path)?;
        self.check_cancelled(path)?;
        let document = BvhDocument::parse(&text).map_err(|err| err.with_path(path))?;
        let clip = Arc::new(document.to_clip(clip_name(path)));
        Ok(LoadedMotion { document, clip })
    }

    fn load_prop(&self, prop: &PropDescriptor) -> Result<LoadedProp> {
        let mtl = self.fetch_text(&prop.mtl)?;
        let materials = MtlLibrary::parse(&mtl).map_err(|err| err.with_path(&prop.mtl))?;
        let obj = self.fetch_text(&prop.obj)?;
        self.check_cancelled(&prop.obj)?;
        let model = ObjModel::parse(&obj).map_err(|err| err.with_path(&prop.obj))?;
        Ok(LoadedProp {
            descriptor: prop.clone(),
            model,
            materials,
        })
    }

    fn fetch_text(&self, path: &str) -> Result<String> {
        self.check_cancelled(path)?;
        let generation = self.ticket.generation();
        let reply = self.reply.clone();
        let mut report = |progress: LoadProgress| {
            let _ = reply.send(LoadEvent::Progress {
                generation,
                path: path.to_string(),
                progress,
            });
        };
        self.fetcher
            .fetch_string(path, &mut report)
            .map_err(|err| err.with_path(path))
    }

    fn check_cancelled(&self, path: &str) -> Result<()> {
        if self.ticket.is_cancelled() {
            Err(ViewerError::Cancelled(path.to_string()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for LoadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadJob")
            .field("ticket", &self.ticket)
            .field("request", &self.request)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn clip_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Decides where load jobs execute.
pub trait LoadDispatcher: Send + Sync {
    fn dispatch(&self, job: LoadJob) -> Result<()>;
}

/// Fixed set of named worker threads fed round-robin.
#[derive(Debug)]
pub struct WorkerPool {
    senders: Mutex<Vec<mpsc::Sender<LoadJob>>>,
    next_sender: AtomicUsize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let count = workers.max(1);
        let mut senders = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::channel::<LoadJob>();
            thread::Builder::new()
                .name(format!("asset-loader-{index}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job.run();
                    }
                })?;
            senders.push(tx);
        }
        Ok(Self {
            senders: Mutex::new(senders),
            next_sender: AtomicUsize::new(0),
        })
    }

    /// Two to four workers depending on available parallelism.
    pub fn with_default_size() -> Result<Self> {
        let workers = thread::available_parallelism()
            .map(|n| n.get().clamp(2, 4))
            .unwrap_or(2);
        Self::new(workers)
    }
}

impl LoadDispatcher for WorkerPool {
    fn dispatch(&self, job: LoadJob) -> Result<()> {
        let senders = self
            .senders
            .lock()
            .map_err(|_| ViewerError::msg("loader worker pool has been poisoned"))?;
        if senders.is_empty() {
            return Err(ViewerError::msg("loader worker pool has no workers"));
        }
        let index = self.next_sender.fetch_add(1, Ordering::Relaxed) % senders.len();
        senders[index]
            .send(job)
            .map_err(|_| ViewerError::msg("loader worker has shut down"))
    }
}

/// Runs each job immediately on the dispatching thread. Results still arrive
/// through the session's event channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl LoadDispatcher for InlineDispatcher {
    fn dispatch(&self, job: LoadJob) -> Result<()> {
        job.run();
        Ok(())
    }
}

/// Holds jobs until they are run explicitly, in any order.
#[derive(Debug, Default)]
pub struct DeferredDispatcher {
    queue: Mutex<VecDeque<LoadJob>>,
}

impl DeferredDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.lock()
            .map(|queue| queue.iter().map(|job| job.request().path().to_string()).collect())
            .unwrap_or_default()
    }

    /// Runs the oldest queued job. Returns `false` when the queue is empty.
    pub fn run_next(&self) -> bool {
        let job = self.lock().ok().and_then(|mut queue| queue.pop_front());
        match job {
            Some(job) => {
                job.run();
                true
            }
            None => false,
        }
    }

    /// Runs the oldest queued job whose request path matches.
    pub fn run_path(&self, path: &str) -> bool {
        let job = self.lock().ok().and_then(|mut queue| {
            let index = queue.iter().position(|job| job.request().path() == path)?;
            queue.remove(index)
        });
        match job {
            Some(job) => {
                job.run();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<LoadJob>>> {
        self.queue
            .lock()
            .map_err(|_| ViewerError::msg("deferred load queue has been poisoned"))
    }
}

impl LoadDispatcher for DeferredDispatcher {
    fn dispatch(&self, job: LoadJob) -> Result<()> {
        self.lock()?.push_back(job);
        Ok(())
    }
}

/// A loaded skeleton attached to the scene together with its player.
#[derive(Debug)]
pub struct AnimatedSubject {
    pub dataset: String,
    pub generation: u64,
    /// Line visualisation of the bones, attached at the scene root.
    pub helper: NodeId,
    /// Group wrapping the root bone, attached at the scene root.
    pub group: NodeId,
    pub bone_root: NodeId,
    pub mixer: AnimationMixer,
    pub clip: Arc<AnimationClip>,
}

/// Builds the bone hierarchy and helper for a loaded motion, re-aims the
/// camera at it and starts looping playback of its clip.
pub fn attach_subject(
    scene: &mut Scene,
    controls: &mut OrbitControls,
    camera: &mut PerspectiveCamera,
    dataset: &str,
    generation: u64,
    motion: LoadedMotion,
) -> Result<AnimatedSubject> {
    let joints = &motion.document.skeleton.joints;
    if joints.is_empty() {
        return Err(ViewerError::msg(format!("`{dataset}` has no joints")).with_path(dataset));
    }

    let mut bones: Vec<NodeId> = Vec::with_capacity(joints.len());
    for joint in joints {
        let bone = scene.spawn(
            Node::new(joint.name.clone(), NodeKind::Bone)
                .with_transform(Transform::from_translation(joint.offset)),
        );
        if let Some(parent) = joint.parent.and_then(|p| bones.get(p).copied()) {
            scene.add_child(parent, bone);
        }
        bones.push(bone);
    }
    let bone_root = bones[0];

    let rest_lines: Vec<Vec3> = joints
        .iter()
        .enumerate()
        .filter_map(|(i, joint)| {
            let parent = joint.parent?;
            Some([scene.world_position(bones[parent])?, scene.world_position(bones[i])?])
        })
        .flatten()
        .collect();
    let geometry = scene.insert_geometry(Geometry::lines("skeleton-helper", rest_lines));
    let material = scene.insert_material(Material::new(
        "skeleton-helper",
        MaterialKind::Line,
        Color::WHITE,
    ));
    let helper = scene.spawn(Node::new(
        "skeleton-helper",
        NodeKind::SkeletonHelper(SkeletonHelper {
            bones: bones.clone(),
            geometry,
            materials: vec![material],
        }),
    ));
    scene.add(helper);

    if let Some(bounds) = scene.bounding_box(helper) {
        controls.set_target(bounds.center());
        controls.update(camera, 0.0);
    }

    let mut mixer = AnimationMixer::new(bone_root);
    mixer.clip_action(motion.clip.clone(), scene).play();

    let group = scene.spawn(Node::group("bvh-bones"));
    scene.add_child(group, bone_root);
    scene.add(group);

    Ok(AnimatedSubject {
        dataset: dataset.to_string(),
        generation,
        helper,
        group,
        bone_root,
        mixer,
        clip: motion.clip,
    })
}

/// Adds a loaded prop under a transformed group node and returns the group.
pub fn attach_prop(scene: &mut Scene, prop: LoadedProp) -> NodeId {
    let LoadedProp {
        descriptor,
        model,
        materials,
    } = prop;

    let transform = Transform::from_translation(Vec3::from_array(descriptor.position))
        .with_rotation(Quat::from_rotation_x(descriptor.rotation_x))
        .with_scale(descriptor.scale);
    let group = scene.spawn(Node::group(descriptor.name.clone()).with_transform(transform));

    for (i, part) in model.groups.iter().enumerate() {
        let material = match part.material.as_deref().and_then(|name| materials.get(name)) {
            Some(mtl) => {
                let mut material = Material::new(mtl.name.clone(), MaterialKind::Phong, Color(mtl.diffuse));
                material.opacity = mtl.opacity;
                material.shininess = mtl.shininess;
                material
            }
            None => Material::new("default", MaterialKind::Phong, Color::WHITE),
        };
        let material = scene.insert_material(material);
        let geometry = scene.insert_geometry(Geometry::triangles(
            format!("{}-{i}", descriptor.name),
            model.positions.clone(),
            part.indices.clone(),
        ));
        let mesh = scene.spawn(Node::new(
            format!("{}-{i}", descriptor.name),
            NodeKind::Mesh {
                geometry,
                materials: vec![material],
            },
        ));
        scene.add_child(group, mesh);
    }

    scene.add(group);
    group
}

/// Removes a prop added by [`attach_prop`] and releases the geometry and
/// materials of every mesh under it. Returns how many nodes were removed.
pub fn dispose_prop(scene: &mut Scene, group: NodeId) -> usize {
    let resources: Vec<_> = scene
        .descendants(group)
        .into_iter()
        .filter_map(|id| match &scene.node(id)?.kind {
            NodeKind::Mesh { geometry, materials } => Some((*geometry, materials.clone())),
            _ => None,
        })
        .collect();
    for (geometry, materials) in resources {
        scene.dispose_geometry(geometry);
        for material in materials {
            scene.dispose_material(material);
        }
    }
    scene.despawn(group)
}
