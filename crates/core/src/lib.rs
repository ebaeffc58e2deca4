//! Core library for the BVH motion-capture viewer.
//!
//! The session owns one scene for one mounted container, plays a single
//! animated skeleton at a time and swaps it out when another dataset is
//! selected. Everything the session draws on (scene graph, camera, BVH and
//! OBJ parsing, animation playback, frame rendering) is a small headless
//! engine living in the other modules.

pub mod animation;
pub mod assets;
pub mod bvh;
pub mod camera;
pub mod config;
pub mod error;
pub mod loader;
pub mod obj;
pub mod render;
pub mod scene;
pub mod session;
pub mod swap;
pub mod timeline;
pub mod ui;

pub use assets::{AssetStore, DatasetDescriptor, DatasetRegistry, FsFetcher, PropDescriptor, ResourceFetcher};
pub use bvh::BvhDocument;
pub use config::ViewerConfig;
pub use error::{Result, ViewerError};
pub use loader::{AnimatedSubject, DeferredDispatcher, InlineDispatcher, LoadDispatcher, WorkerPool};
pub use render::{FrameStats, HeadlessContainer, RenderContainer};
pub use session::ViewerSession;
pub use swap::SwapController;
pub use timeline::{FixedStepDriver, FrameDriver, RealtimeDriver};
pub use ui::{Toolbar, UiEvent};
