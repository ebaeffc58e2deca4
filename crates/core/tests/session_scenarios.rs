use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bvh_viewer_core::{
    assets::LoadProgress,
    scene::{NodeKind, Scene},
    ui, AssetStore, DeferredDispatcher, FixedStepDriver, HeadlessContainer, InlineDispatcher,
    ResourceFetcher, Result, Toolbar, UiEvent, ViewerConfig, ViewerSession, WorkerPool,
};

const CROSSOVER: &str = "bvh-data/crossover.bvh";
const THROUGH_LEGS: &str = "bvh-data/through-legs.bvh";

const WALK: &str = "HIERARCHY
ROOT Hips
{
  OFFSET 0 90 0
  CHANNELS 3 Xposition Yposition Zposition
  JOINT Spine
  {
    OFFSET 0 20 0
    CHANNELS 3 Zrotation Xrotation Yrotation
    End Site
    {
      OFFSET 0 10 0
    }
  }
}
MOTION
Frames: 2
Frame Time: 0.1
0 0 0 0 0 0
0 10 0 0 0 45
";

const HOOP_MTL: &str = "newmtl orange\nKd 1 0.5 0\n";
const HOOP_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl orange\nf 1 2 3\n";

struct Harness {
    store: AssetStore,
    loads: Arc<DeferredDispatcher>,
    session: ViewerSession<HeadlessContainer>,
}

fn harness(config: ViewerConfig) -> Harness {
    let store = AssetStore::new();
    store.insert(CROSSOVER, WALK).unwrap();
    store.insert(THROUGH_LEGS, WALK).unwrap();
    let loads = Arc::new(DeferredDispatcher::new());
    let session = ViewerSession::initialize(
        HeadlessContainer::new(800, 600),
        config,
        Arc::new(store.clone()),
        loads.clone(),
    )
    .unwrap();
    Harness { store, loads, session }
}

fn without_props() -> ViewerConfig {
    ViewerConfig {
        props: Vec::new(),
        ..ViewerConfig::default()
    }
}

fn scene(session: &ViewerSession<HeadlessContainer>) -> &Scene {
    session.scene().unwrap()
}

fn helpers(scene: &Scene) -> usize {
    scene.count_attached(|node| matches!(node.kind, NodeKind::SkeletonHelper(_)))
}

#[test]
fn initialize_builds_static_scene_and_starts_prop_loads() {
    let h = harness(ViewerConfig::default());
    let scene = scene(&h.session);

    assert_eq!(h.session.camera().unwrap().aspect, 800.0 / 600.0);
    assert_eq!(scene.count_attached(|node| matches!(node.kind, NodeKind::Light(_))), 2);
    assert_eq!(scene.count_attached(|node| matches!(node.kind, NodeKind::Grid(_))), 1);
    assert_eq!(scene.count_attached(|node| matches!(node.kind, NodeKind::Axes { .. })), 1);
    assert_eq!(scene.count_attached(|node| node.name == "floor"), 1);
    assert_eq!(helpers(scene), 0);
    assert!(h.session.subject().is_none());
    assert!(!h.session.is_loading());

    assert_eq!(h.loads.pending_paths(), vec!["3d-models/hoop.obj", "3d-models/ball.obj"]);
    assert_eq!(h.session.pending_prop_loads(), 2);
    assert_eq!(h.session.container().surfaces().len(), 1);
}

#[test]
fn swap_on_empty_scene_attaches_one_playing_subject() {
    let mut h = harness(without_props());

    h.session.swap_to(CROSSOVER).unwrap();
    assert!(h.session.is_loading());
    assert_eq!(h.session.selected_dataset(), Some(CROSSOVER));
    assert!(h.session.subject().is_none());

    assert!(h.loads.run_path(CROSSOVER));
    h.session.pump_loads();

    assert!(!h.session.is_loading());
    let subject = h.session.subject().unwrap();
    assert_eq!(subject.dataset, CROSSOVER);
    assert!(subject.mixer.is_playing());
    assert_eq!(helpers(scene(&h.session)), 1);
}

#[test]
fn frames_advance_the_subject_playback() {
    let mut h = harness(without_props());
    h.session.swap_to(CROSSOVER).unwrap();
    h.loads.run_all();
    h.session.pump_loads();

    let stats = h.session.render_frame(0.05).unwrap().unwrap();
    assert_eq!(stats.bones, 3);
    assert!(stats.line_segments > 0);

    let hips = h.session.subject().unwrap().bone_root;
    let y = scene(&h.session).node(hips).unwrap().transform.translation.y;
    assert!((y - 95.0).abs() < 1e-3, "hips at {y}");
}

#[test]
fn later_swap_wins_whatever_order_loads_finish() {
    let mut h = harness(without_props());

    h.session.swap_to(CROSSOVER).unwrap();
    h.session.swap_to(THROUGH_LEGS).unwrap();

    assert!(h.loads.run_path(THROUGH_LEGS));
    h.session.pump_loads();
    assert!(h.loads.run_path(CROSSOVER));
    h.session.pump_loads();

    assert!(!h.session.is_loading());
    assert_eq!(h.session.subject().unwrap().dataset, THROUGH_LEGS);
    assert_eq!(helpers(scene(&h.session)), 1);
}

#[test]
fn superseded_result_already_queued_is_discarded() {
    let mut h = harness(without_props());

    h.session.swap_to(CROSSOVER).unwrap();
    // Finishes before the next swap but is applied after it.
    assert!(h.loads.run_path(CROSSOVER));
    h.session.swap_to(THROUGH_LEGS).unwrap();
    h.session.pump_loads();

    assert!(h.session.is_loading());
    assert!(h.session.subject().is_none());
    assert_eq!(helpers(scene(&h.session)), 0);

    h.loads.run_all();
    h.session.pump_loads();
    assert!(!h.session.is_loading());
    assert_eq!(h.session.subject().unwrap().dataset, THROUGH_LEGS);
}

#[test]
fn reselecting_the_same_dataset_reloads_it() {
    let mut h = harness(without_props());
    let baseline = (scene(&h.session).live_geometries(), scene(&h.session).live_materials());

    h.session.swap_to(CROSSOVER).unwrap();
    h.loads.run_all();
    h.session.pump_loads();
    let first = h.session.subject().unwrap().helper;

    h.session.swap_to(CROSSOVER).unwrap();
    assert!(h.session.subject().is_none());
    assert!(h.session.is_loading());
    assert_eq!(
        (scene(&h.session).live_geometries(), scene(&h.session).live_materials()),
        baseline
    );
    assert_eq!(h.loads.pending(), 1);

    h.loads.run_all();
    h.session.pump_loads();
    let subject = h.session.subject().unwrap();
    assert_eq!(subject.generation, 2);
    assert_ne!(subject.helper, first);
    assert!(scene(&h.session).node(first).is_none());
    assert_eq!(helpers(scene(&h.session)), 1);
}

#[test]
fn failed_subject_load_leaves_scene_empty_and_rendering() {
    let mut h = harness(without_props());
    h.store.insert("bvh-data/broken.bvh", "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0\n").unwrap();

    h.session.swap_to("bvh-data/missing.bvh").unwrap();
    h.loads.run_all();
    h.session.pump_loads();
    assert!(!h.session.is_loading());
    assert!(h.session.subject().is_none());

    h.session.swap_to("bvh-data/broken.bvh").unwrap();
    h.loads.run_all();
    h.session.pump_loads();
    assert!(!h.session.is_loading());
    assert!(h.session.subject().is_none());

    assert!(h.session.render_frame(0.016).unwrap().is_some());

    h.session.swap_to(CROSSOVER).unwrap();
    h.loads.run_all();
    h.session.pump_loads();
    assert!(h.session.subject().is_some());
}

#[test]
fn prop_failure_is_not_fatal() {
    let mut h = harness(ViewerConfig::default());
    h.store.insert("3d-models/hoop.mtl", HOOP_MTL).unwrap();
    h.store.insert("3d-models/hoop.obj", HOOP_OBJ).unwrap();

    assert_eq!(h.loads.run_all(), 2);
    h.session.pump_loads();

    let context = h.session.context().unwrap();
    assert_eq!(context.props().len(), 1);
    assert_eq!(context.scene.node(context.props()[0]).unwrap().name, "hoop");
    assert_eq!(h.session.pending_prop_loads(), 0);

    let stats = h.session.render_frame(0.016).unwrap().unwrap();
    assert_eq!(stats.meshes, 2);
    assert_eq!(stats.triangles, 3);
}

#[test]
fn resize_bursts_collapse_to_one_per_interval() {
    let mut h = harness(without_props());
    let start = Instant::now();

    let applied = (0..10u32)
        .filter(|&i| {
            h.session
                .on_resize_at(1000 + i, 500, start + Duration::from_millis(u64::from(i) * 9))
        })
        .count();
    assert_eq!(applied, 1);
    assert_eq!(h.session.resizes_applied(), 1);
    assert_eq!(h.session.renderer().unwrap().size(), (1000, 500));

    h.session
        .render_frame_at(0.016, start + Duration::from_millis(150))
        .unwrap();
    assert_eq!(h.session.resizes_applied(), 2);
    assert_eq!(h.session.renderer().unwrap().size(), (1009, 500));
    assert_eq!(h.session.camera().unwrap().aspect, 1009.0 / 500.0);
}

#[test]
fn teardown_right_after_initialize_releases_everything_once() {
    let mut h = harness(ViewerConfig::default());
    h.session.swap_to(CROSSOVER).unwrap();

    assert!(h.session.teardown());
    assert!(h.session.container().surfaces().is_empty());
    assert!(h.session.scene().is_none());
    assert!(!h.session.is_running());
    assert!(!h.session.is_loading());

    // Loads that were still queued finish into a closed session.
    h.loads.run_all();
    h.session.pump_loads();
    assert!(h.session.subject().is_none());

    assert!(!h.session.teardown());
    assert!(h.session.render_frame(0.016).unwrap().is_none());
}

#[test]
fn teardown_with_subject_attached() {
    let mut h = harness(without_props());
    h.session.swap_to(CROSSOVER).unwrap();
    h.loads.run_all();
    h.session.pump_loads();

    assert!(h.session.teardown());
    assert!(h.session.subject().is_none());
    assert!(h.session.container().surfaces().is_empty());
}

#[test]
fn toolbar_events_drive_swaps() {
    let mut h = harness(without_props());
    let toolbar = Toolbar::new(h.session.config().registry());

    let event = toolbar.select("Through Legs").unwrap();
    assert_eq!(event, UiEvent::SelectDataset(THROUGH_LEGS.to_string()));
    ui::forward(&mut h.session, event).unwrap();

    let text = toolbar.render_for(&h.session);
    assert!(text.contains("> [2] Through Legs (loading...)"), "{text}");

    h.loads.run_all();
    h.session.pump_loads();
    assert!(!toolbar.render_for(&h.session).contains("loading"));
}

#[test]
fn run_drives_frames_until_the_driver_stops() {
    let store = AssetStore::new();
    store.insert(CROSSOVER, WALK).unwrap();
    let mut session = ViewerSession::initialize(
        HeadlessContainer::new(640, 480),
        without_props(),
        Arc::new(store),
        Arc::new(InlineDispatcher),
    )
    .unwrap();

    session.load_initial_dataset().unwrap();
    let frames = session.run(&mut FixedStepDriver::new(1.0 / 60.0, Some(3))).unwrap();

    assert_eq!(frames, 3);
    assert_eq!(session.renderer().unwrap().frames_rendered(), 3);
    assert!(session.subject().unwrap().mixer.is_playing());
}

struct PanickingFetcher {
    inner: AssetStore,
}

impl ResourceFetcher for PanickingFetcher {
    fn fetch(&self, path: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<Vec<u8>> {
        if path.ends_with("through-legs.bvh") {
            panic!("corrupt read of {path}");
        }
        self.inner.fetch(path, progress)
    }
}

fn pump_until_settled(session: &mut ViewerSession<HeadlessContainer>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.is_loading() && Instant::now() < deadline {
        session.pump_loads();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn panicking_load_on_worker_pool_still_settles() {
    let store = AssetStore::new();
    store.insert(CROSSOVER, WALK).unwrap();
    let mut session = ViewerSession::initialize(
        HeadlessContainer::new(800, 600),
        without_props(),
        Arc::new(PanickingFetcher { inner: store }),
        Arc::new(WorkerPool::new(1).unwrap()),
    )
    .unwrap();

    session.swap_to(THROUGH_LEGS).unwrap();
    pump_until_settled(&mut session);
    assert!(!session.is_loading());
    assert!(session.subject().is_none());

    // The single worker is still alive for the next request.
    session.swap_to(CROSSOVER).unwrap();
    pump_until_settled(&mut session);
    assert!(!session.is_loading());
    assert_eq!(session.subject().unwrap().dataset, CROSSOVER);
}
