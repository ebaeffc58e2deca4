use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{Result, ViewerError};

const READ_CHUNK: usize = 64 * 1024;

/// A selectable animation dataset: the toolbar label and the resource it loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub label: String,
    pub path: String,
}

impl DatasetDescriptor {
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// Ordered, immutable list of datasets offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRegistry {
    datasets: Vec<DatasetDescriptor>,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DatasetRegistry {
    /// The five basketball captures shipped with the viewer.
    pub fn builtin() -> Self {
        Self::new(vec![
            DatasetDescriptor::new("Crossover - Shoot", "bvh-data/crossover.bvh"),
            DatasetDescriptor::new("Through Legs", "bvh-data/through-legs.bvh"),
            DatasetDescriptor::new("Dribbble Forward", "bvh-data/forward-dribble.bvh"),
            DatasetDescriptor::new("Dribbble Back", "bvh-data/backward-dribble.bvh"),
            DatasetDescriptor::new("Dribbble Side", "bvh-data/sideways-dribble.bvh"),
        ])
    }

    pub fn new(datasets: Vec<DatasetDescriptor>) -> Self {
        Self { datasets }
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DatasetDescriptor> {
        self.datasets.get(index)
    }

    pub fn first(&self) -> Option<&DatasetDescriptor> {
        self.datasets.first()
    }

    pub fn by_path(&self, path: &str) -> Option<&DatasetDescriptor> {
        let wanted = normalize_path(path);
        self.datasets
            .iter()
            .find(|dataset| normalize_path(&dataset.path) == wanted)
    }

    /// Resolves user input: a 1-based index, a label (case-insensitive) or a path.
    pub fn resolve(&self, query: &str) -> Result<&DatasetDescriptor> {
        let query = query.trim();
        if let Ok(index) = query.parse::<usize>() {
            if let Some(dataset) = index.checked_sub(1).and_then(|i| self.get(i)) {
                return Ok(dataset);
            }
        }

        self.datasets
            .iter()
            .find(|dataset| dataset.label.eq_ignore_ascii_case(query))
            .or_else(|| self.by_path(query))
            .ok_or_else(|| ViewerError::UnknownDataset(query.to_string()))
    }
}

/// A static OBJ/MTL prop placed in the scene at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropDescriptor {
    pub name: String,
    pub obj: String,
    pub mtl: String,
    pub position: [f32; 3],
    /// Rotation about the X axis, in radians.
    #[serde(default)]
    pub rotation_x: f32,
    #[serde(default = "default_prop_scale")]
    pub scale: f32,
}

fn default_prop_scale() -> f32 {
    1.0
}

impl PropDescriptor {
    pub fn hoop() -> Self {
        Self {
            name: "hoop".to_string(),
            obj: "3d-models/hoop.obj".to_string(),
            mtl: "3d-models/hoop.mtl".to_string(),
            position: [0.0, 0.0, -70.0],
            rotation_x: -std::f32::consts::FRAC_PI_2,
            scale: 0.1,
        }
    }

    pub fn ball() -> Self {
        Self {
            name: "ball".to_string(),
            obj: "3d-models/ball.obj".to_string(),
            mtl: "3d-models/ball.mtl".to_string(),
            position: [0.0, 1.0, -60.0],
            rotation_x: -std::f32::consts::FRAC_PI_2,
            scale: 0.1,
        }
    }
}

/// Byte progress reported while a resource is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl LoadProgress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            self.loaded as f32 / self.total as f32 * 100.0
        }
    }
}

/// Source of raw resource bytes. Implementations are shared with load workers.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, path: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<Vec<u8>>;

    fn fetch_string(&self, path: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<String> {
        let bytes = self.fetch(path, progress)?;
        String::from_utf8(bytes)
            .map_err(|_| ViewerError::msg(format!("`{path}` is not valid UTF-8")))
    }
}

/// Resource paths are web-style; a leading `/` refers to the asset root.
pub fn normalize_path(path: &str) -> &str {
    path.trim().trim_start_matches('/')
}

/// Reads resources from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(normalize_path(path))
    }
}

impl ResourceFetcher for FsFetcher {
    fn fetch(&self, path: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        let mut file = File::open(&full)?;
        let total = file.metadata()?.len();
        let mut bytes = Vec::with_capacity(total as usize);
        let mut chunk = vec![0_u8; READ_CHUNK];

        loop {
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            progress(LoadProgress {
                loaded: bytes.len() as u64,
                total,
            });
        }

        Ok(bytes)
    }
}

/// In-memory resource registry, used for embedded assets and headless runs.
#[derive(Debug, Default, Clone)]
pub struct AssetStore {
    entries: Arc<Mutex<HashMap<String, Arc<[u8]>>>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let bytes: Vec<u8> = bytes.into();
        let mut entries = self.lock()?;
        entries.insert(normalize_path(path).to_string(), Arc::from(bytes));
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        Ok(entries.remove(normalize_path(path)).is_some())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(normalize_path(path)))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<[u8]>>>> {
        self.entries
            .lock()
            .map_err(|_| ViewerError::msg("asset store has been poisoned"))
    }
}

impl ResourceFetcher for AssetStore {
    fn fetch(&self, path: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<Vec<u8>> {
        let bytes = {
            let entries = self.lock()?;
            entries.get(normalize_path(path)).cloned()
        };
        let bytes = bytes.ok_or_else(|| {
            ViewerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no asset registered at `{path}`"),
            ))
        })?;

        let total = bytes.len() as u64;
        progress(LoadProgress {
            loaded: total,
            total,
        });
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_five_datasets_in_order() {
        let registry = DatasetRegistry::builtin();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.first().unwrap().label, "Crossover - Shoot");
        assert_eq!(registry.get(1).unwrap().path, "bvh-data/through-legs.bvh");
    }

    #[test]
    fn resolves_index_label_and_path() {
        let registry = DatasetRegistry::builtin();

        assert_eq!(registry.resolve("2").unwrap().label, "Through Legs");
        assert_eq!(
            registry.resolve("dribbble side").unwrap().path,
            "bvh-data/sideways-dribble.bvh"
        );
        assert_eq!(
            registry.resolve("/bvh-data/crossover.bvh").unwrap().label,
            "Crossover - Shoot"
        );
    }

    #[test]
    fn errors_on_unknown_dataset() {
        let registry = DatasetRegistry::builtin();
        let err = registry.resolve("free-throw").unwrap_err();
        assert!(format!("{err}").contains("free-throw"));
        assert!(registry.resolve("0").is_err());
    }

    #[test]
    fn asset_store_ignores_leading_slash() {
        let store = AssetStore::new();
        store.insert("/bvh-data/a.bvh", b"HIERARCHY".to_vec()).unwrap();

        let mut reports = Vec::new();
        let bytes = store
            .fetch("bvh-data/a.bvh", &mut |p| reports.push(p))
            .unwrap();

        assert_eq!(bytes, b"HIERARCHY");
        assert_eq!(reports.last().unwrap().percent(), 100.0);
    }

    #[test]
    fn asset_store_reports_missing_assets() {
        let store = AssetStore::new();
        let err = store.fetch("missing.bvh", &mut |_| {}).unwrap_err();
        assert!(matches!(err, ViewerError::Io(_)));
    }

    #[test]
    fn fs_fetcher_resolves_under_root() {
        let fetcher = FsFetcher::new("/srv/assets");
        assert_eq!(
            fetcher.resolve("/3d-models/hoop.obj"),
            PathBuf::from("/srv/assets/3d-models/hoop.obj")
        );
    }
}
