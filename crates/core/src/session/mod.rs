//! Scene lifecycle: one-time scene construction, the per-frame update,
//! throttled resizing, dataset swaps and teardown.

use std::{
    f32::consts::FRAC_PI_2,
    sync::{mpsc, Arc},
    time::Instant,
};

use glam::{Quat, Vec3};
use tracing::{debug, error, info, warn};

use crate::{
    assets::ResourceFetcher,
    camera::{OrbitControls, PerspectiveCamera},
    config::ViewerConfig,
    loader::{
        attach_prop, attach_subject, dispose_prop, AnimatedSubject, LoadDispatcher, LoadEvent, LoadJob,
        LoadPayload, LoadRequest, LoadTicket,
    },
    render::{FrameStats, RenderContainer, Renderer},
    scene::{
        Color, Geometry, GeometryId, GridHelper, Light, LightKind, Material, MaterialId,
        MaterialKind, Node, NodeId, NodeKind, Scene, Transform,
    },
    swap::SwapController,
    timeline::{FrameClock, FrameDriver, Throttle},
    Result, ViewerError,
};

/// Everything that lives for exactly one mounted session.
#[derive(Debug)]
pub struct SceneContext {
    pub scene: Scene,
    pub camera: PerspectiveCamera,
    pub renderer: Renderer,
    pub controls: OrbitControls,
    pub clock: FrameClock,
    floor_geometry: GeometryId,
    floor_material: MaterialId,
    props: Vec<NodeId>,
}

impl SceneContext {
    fn build(config: &ViewerConfig, width: u32, height: u32, pixel_ratio: f32) -> Self {
        let mut scene = Scene::new(Color::from_hex(config.renderer.background));

        let aspect = if height > 0 { width as f32 / height as f32 } else { 1.0 };
        let mut camera = PerspectiveCamera::new(config.camera.fov, aspect, config.camera.near, config.camera.far);
        camera.position = Vec3::from_array(config.camera.position);
        camera.look_at(Vec3::from_array(config.camera.target));

        let mut renderer = Renderer::new(&config.renderer);
        renderer.set_pixel_ratio(pixel_ratio);
        renderer.set_size(width, height);

        let mut controls = OrbitControls::new(Vec3::from_array(config.camera.target));
        controls.enable_damping = config.controls.enable_damping;
        controls.damping_factor = config.controls.damping_factor;

        let lighting = &config.lighting;
        let hemisphere = scene.spawn(
            Node::new(
                "hemisphere-light",
                NodeKind::Light(Light {
                    kind: LightKind::Hemisphere {
                        ground: Color::from_hex(lighting.ground_color),
                    },
                    color: Color::from_hex(lighting.sky_color),
                    intensity: lighting.hemisphere_intensity,
                }),
            )
            .with_transform(Transform::from_translation(Vec3::from_array(lighting.hemisphere_position))),
        );
        scene.add(hemisphere);

        let directional = scene.spawn(
            Node::new(
                "directional-light",
                NodeKind::Light(Light {
                    kind: LightKind::Directional,
                    color: Color::from_hex(lighting.directional_color),
                    intensity: lighting.directional_intensity,
                }),
            )
            .with_transform(Transform::from_translation(Vec3::from_array(lighting.directional_position))),
        );
        scene.add(directional);

        let floor = &config.floor;
        let floor_geometry = scene.insert_geometry(Geometry::plane(floor.size, floor.size));
        let mut material = Material::new("floor", MaterialKind::Phong, Color::from_hex(floor.color));
        material.depth_write = false;
        let floor_material = scene.insert_material(material);
        let floor_node = scene.spawn(
            Node::new(
                "floor",
                NodeKind::Mesh {
                    geometry: floor_geometry,
                    materials: vec![floor_material],
                },
            )
            .with_transform(Transform::IDENTITY.with_rotation(Quat::from_rotation_x(-FRAC_PI_2))),
        );
        scene.add(floor_node);

        let grid = scene.spawn(Node::new(
            "grid",
            NodeKind::Grid(GridHelper {
                size: floor.size,
                divisions: floor.grid_divisions,
                center_color: Color::from_hex(floor.grid_center_color),
                line_color: Color::from_hex(floor.grid_line_color),
            }),
        ));
        scene.add(grid);

        let axes = scene.spawn(Node::new("axes", NodeKind::Axes { size: floor.axes_size }));
        scene.add(axes);

        Self {
            scene,
            camera,
            renderer,
            controls,
            clock: FrameClock::start(),
            floor_geometry,
            floor_material,
            props: Vec::new(),
        }
    }

    pub fn props(&self) -> &[NodeId] {
        &self.props
    }

    /// Releases the subject, the props and the floor resources.
    fn release(&mut self, swap: &mut SwapController) {
        swap.dispose_current(&mut self.scene);
        for prop in self.props.drain(..) {
            dispose_prop(&mut self.scene, prop);
        }
        self.scene.dispose_geometry(self.floor_geometry);
        self.scene.dispose_material(self.floor_material);
    }
}

/// Owns the scene for one mounted container. Resource loads run elsewhere and
/// are applied on this thread by [`ViewerSession::pump_loads`].
pub struct ViewerSession<C: RenderContainer> {
    container: C,
    config: ViewerConfig,
    context: Option<SceneContext>,
    swap: SwapController,
    fetcher: Arc<dyn ResourceFetcher>,
    dispatcher: Arc<dyn LoadDispatcher>,
    events_tx: mpsc::Sender<LoadEvent>,
    events_rx: mpsc::Receiver<LoadEvent>,
    resize_throttle: Throttle,
    pending_resize: Option<(u32, u32)>,
    resizes_applied: u64,
    pending_props: usize,
    running: bool,
}

impl<C: RenderContainer> ViewerSession<C> {
    /// Builds the scene sized to the container, mounts the render surface,
    /// starts loading the static props and starts the frame loop.
    pub fn initialize(
        mut container: C,
        config: ViewerConfig,
        fetcher: Arc<dyn ResourceFetcher>,
        dispatcher: Arc<dyn LoadDispatcher>,
    ) -> Result<Self> {
        config.validate()?;

        let (width, height) = container.size();
        let context = SceneContext::build(&config, width, height, container.device_pixel_ratio());
        container.attach_surface(context.renderer.surface());

        let (events_tx, events_rx) = mpsc::channel();
        let mut session = Self {
            container,
            resize_throttle: Throttle::new(config.resize_throttle()),
            config,
            context: Some(context),
            swap: SwapController::new(),
            fetcher,
            dispatcher,
            events_tx,
            events_rx,
            pending_resize: None,
            resizes_applied: 0,
            pending_props: 0,
            running: true,
        };

        for prop in session.config.props.clone() {
            let name = prop.name.clone();
            let job = LoadJob::new(
                LoadTicket::new(0),
                LoadRequest::Prop(prop),
                session.fetcher.clone(),
                session.events_tx.clone(),
            );
            session.pending_props += 1;
            if let Err(err) = session.dispatcher.dispatch(job) {
                session.pending_props -= 1;
                error!(prop = %name, error = %err, "could not start prop load");
            }
        }

        info!(width, height, props = session.pending_props, "viewer initialised");
        Ok(session)
    }

    /// Swaps to the configured start-up dataset.
    pub fn load_initial_dataset(&mut self) -> Result<()> {
        let path = self
            .config
            .initial_dataset()
            .ok_or_else(|| ViewerError::msg("no dataset configured"))?;
        self.swap_to(&path)
    }

    /// Disposes the current subject, then requests `path`. The previous
    /// in-flight load, if any, is cancelled and its result will be ignored.
    pub fn swap_to(&mut self, path: &str) -> Result<()> {
        if !self.running {
            return Err(ViewerError::SessionClosed);
        }
        let context = self.context.as_mut().ok_or(ViewerError::SessionClosed)?;

        let ticket = self.swap.begin(&mut context.scene, path);
        info!(path, generation = ticket.generation(), "loading dataset");

        let job = LoadJob::new(
            ticket.clone(),
            LoadRequest::Subject {
                path: path.to_string(),
            },
            self.fetcher.clone(),
            self.events_tx.clone(),
        );
        if let Err(err) = self.dispatcher.dispatch(job) {
            self.swap.settle(&ticket);
            error!(path, error = %err, "could not start dataset load");
            return Err(err);
        }
        Ok(())
    }

    /// Resolves a toolbar query (index, label or path) and swaps to it.
    pub fn select_dataset(&mut self, query: &str) -> Result<()> {
        let path = self.config.registry().resolve(query)?.path.clone();
        self.swap_to(&path)
    }

    /// Applies every load result that has arrived. Returns how many events were handled.
    pub fn pump_loads(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            handled += 1;
            if !self.running {
                continue;
            }
            match event {
                LoadEvent::Progress {
                    generation,
                    path,
                    progress,
                } => {
                    debug!(%path, generation, "{:.0}% loaded", progress.percent());
                }
                LoadEvent::Finished {
                    ticket,
                    request: LoadRequest::Subject { path },
                    result,
                } => self.finish_subject(&ticket, &path, result),
                LoadEvent::Finished {
                    request: LoadRequest::Prop(prop),
                    result,
                    ..
                } => self.finish_prop(&prop.name, result),
            }
        }
        handled
    }

    fn finish_subject(&mut self, ticket: &LoadTicket, path: &str, result: Result<LoadPayload>) {
        if !self.swap.settle(ticket) {
            match result {
                Ok(_) => warn!(path, generation = ticket.generation(), "discarding superseded dataset"),
                Err(err) => debug!(path, error = %err, "superseded load ended"),
            }
            return;
        }
        let Some(context) = self.context.as_mut() else {
            return;
        };

        match result {
            Ok(LoadPayload::Subject(motion)) => {
                let attached = attach_subject(
                    &mut context.scene,
                    &mut context.controls,
                    &mut context.camera,
                    path,
                    ticket.generation(),
                    motion,
                );
                match attached {
                    Ok(subject) => {
                        info!(
                            path,
                            bones = motion_bone_count(&subject, &context.scene),
                            duration = subject.clip.duration,
                            "dataset attached"
                        );
                        self.swap.install(&mut context.scene, subject);
                    }
                    Err(err) => error!(path, error = %err, "dataset could not be attached"),
                }
            }
            Ok(LoadPayload::Prop(_)) => error!(path, "dataset load produced a prop"),
            Err(err) => error!(path, error = %err, "dataset load failed"),
        }
    }

    fn finish_prop(&mut self, name: &str, result: Result<LoadPayload>) {
        self.pending_props = self.pending_props.saturating_sub(1);
        let Some(context) = self.context.as_mut() else {
            return;
        };

        match result {
            Ok(LoadPayload::Prop(prop)) => {
                let node = attach_prop(&mut context.scene, prop);
                context.props.push(node);
                info!(prop = name, "prop attached");
            }
            Ok(LoadPayload::Subject(_)) => error!(prop = name, "prop load produced a dataset"),
            Err(err) => error!(prop = name, error = %err, "prop load failed"),
        }
    }

    /// Throttled resize. Returns whether this call was applied; a dropped size
    /// is remembered and applied by a later frame once the throttle reopens.
    pub fn on_resize(&mut self, width: u32, height: u32) -> bool {
        self.on_resize_at(width, height, Instant::now())
    }

    pub fn on_resize_at(&mut self, width: u32, height: u32, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        if self.resize_throttle.try_pass(now) {
            self.pending_resize = None;
            self.apply_resize(width, height);
            true
        } else {
            self.pending_resize = Some((width, height));
            false
        }
    }

    fn apply_resize(&mut self, width: u32, height: u32) {
        if let Some(context) = self.context.as_mut() {
            context.camera.set_viewport(width, height);
            context.renderer.set_size(width, height);
            self.resizes_applied += 1;
            debug!(width, height, "viewport resized");
        }
    }

    /// Advances playback by `delta` seconds, updates the camera and renders once.
    /// Returns `None` after teardown.
    pub fn render_frame(&mut self, delta: f32) -> Result<Option<FrameStats>> {
        self.render_frame_at(delta, Instant::now())
    }

    pub fn render_frame_at(&mut self, delta: f32, now: Instant) -> Result<Option<FrameStats>> {
        if !self.running {
            return Ok(None);
        }

        if let Some((width, height)) = self.pending_resize {
            if self.resize_throttle.try_pass(now) {
                self.pending_resize = None;
                self.apply_resize(width, height);
            }
        }

        let Some(context) = self.context.as_mut() else {
            return Ok(None);
        };
        if let Some(subject) = self.swap.current_mut() {
            subject.mixer.update(delta, &mut context.scene);
        }
        context.controls.update(&mut context.camera, delta);
        let stats = context.renderer.render(&context.scene, &context.camera)?;
        Ok(Some(stats))
    }

    /// One frame timed by the session clock: apply arrived loads, then render.
    pub fn tick(&mut self) -> Result<Option<FrameStats>> {
        self.pump_loads();
        let delta = match self.context.as_mut() {
            Some(context) => context.clock.delta(),
            None => return Ok(None),
        };
        self.render_frame(delta)
    }

    /// Runs frames supplied by `driver` until it stops or the session is torn
    /// down. Returns the number of frames rendered.
    pub fn run(&mut self, driver: &mut dyn FrameDriver) -> Result<u64> {
        let mut frames = 0;
        while self.running {
            let Some(delta) = driver.next_frame() else {
                break;
            };
            self.pump_loads();
            if self.render_frame(delta)?.is_some() {
                frames += 1;
            }
        }
        Ok(frames)
    }

    /// Stops the frame loop, drops pending work and releases everything the
    /// session created. Safe to call more than once; only the first call acts.
    pub fn teardown(&mut self) -> bool {
        if !self.running && self.context.is_none() {
            return false;
        }
        self.running = false;
        self.pending_resize = None;
        self.swap.abandon();

        if let Some(mut context) = self.context.take() {
            context.release(&mut self.swap);
            context.controls.dispose();
            context.renderer.dispose();
            let (geometries, materials) = (context.scene.live_geometries(), context.scene.live_materials());
            if geometries + materials > 0 {
                warn!(geometries, materials, "scene resources still live at teardown");
            }
            if !self.container.detach_surface(context.renderer.surface()) {
                warn!("render surface was already detached from its container");
            }
            context.scene.clear();
        }

        while self.events_rx.try_recv().is_ok() {}
        info!("viewer torn down");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_loading(&self) -> bool {
        self.swap.is_loading()
    }

    pub fn selected_dataset(&self) -> Option<&str> {
        self.swap.selected()
    }

    pub fn subject(&self) -> Option<&AnimatedSubject> {
        self.swap.current()
    }

    pub fn context(&self) -> Option<&SceneContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut SceneContext> {
        self.context.as_mut()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.context.as_ref().map(|context| &context.scene)
    }

    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.context.as_ref().map(|context| &context.camera)
    }

    pub fn renderer(&self) -> Option<&Renderer> {
        self.context.as_ref().map(|context| &context.renderer)
    }

    pub fn controls_mut(&mut self) -> Option<&mut OrbitControls> {
        self.context.as_mut().map(|context| &mut context.controls)
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn resizes_applied(&self) -> u64 {
        self.resizes_applied
    }

    pub fn pending_prop_loads(&self) -> usize {
        self.pending_props
    }
}

impl<C: RenderContainer> Drop for ViewerSession<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<C: RenderContainer> std::fmt::Debug for ViewerSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("running", &self.running)
            .field("selected", &self.swap.selected())
            .field("loading", &self.swap.is_loading())
            .finish()
    }
}

fn motion_bone_count(subject: &AnimatedSubject, scene: &Scene) -> usize {
    scene.descendants(subject.bone_root).len()
}
