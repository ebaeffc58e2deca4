use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    assets::{DatasetDescriptor, DatasetRegistry, PropDescriptor},
    Result, ViewerError,
};

/// Top-level configuration structure for the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub asset_root: PathBuf,
    /// Path of the dataset selected on start-up; the first dataset when empty.
    pub initial_dataset: String,
    pub datasets: Vec<DatasetDescriptor>,
    pub props: Vec<PropDescriptor>,
    pub camera: CameraConfig,
    pub renderer: RendererConfig,
    pub lighting: LightingConfig,
    pub floor: FloorConfig,
    pub controls: ControlsConfig,
    pub resize_throttle_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let registry = DatasetRegistry::builtin();
        Self {
            asset_root: PathBuf::from("public"),
            initial_dataset: registry
                .first()
                .map(|dataset| dataset.path.clone())
                .unwrap_or_default(),
            datasets: registry.iter().cloned().collect(),
            props: vec![PropDescriptor::hoop(), PropDescriptor::ball()],
            camera: CameraConfig::default(),
            renderer: RendererConfig::default(),
            lighting: LightingConfig::default(),
            floor: FloorConfig::default(),
            controls: ControlsConfig::default(),
            resize_throttle_ms: 100,
        }
    }
}

impl ViewerConfig {
    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(ViewerError::msg("configuration lists no datasets"));
        }
        if !self.initial_dataset.is_empty() && self.registry().by_path(&self.initial_dataset).is_none() {
            return Err(ViewerError::UnknownDataset(self.initial_dataset.clone()));
        }
        Ok(())
    }

    pub fn registry(&self) -> DatasetRegistry {
        DatasetRegistry::new(self.datasets.clone())
    }

    pub fn initial_dataset(&self) -> Option<String> {
        if self.initial_dataset.is_empty() {
            self.datasets.first().map(|dataset| dataset.path.clone())
        } else {
            Some(self.initial_dataset.clone())
        }
    }

    pub fn resize_throttle(&self) -> Duration {
        Duration::from_millis(self.resize_throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 50.0,
            near: 0.1,
            far: 1000.0,
            position: [-50.0, 20.0, 70.0],
            target: [0.0, 50.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub antialias: bool,
    pub max_pixel_ratio: f32,
    pub background: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            antialias: true,
            max_pixel_ratio: 2.0,
            background: 0x111111,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub sky_color: u32,
    pub ground_color: u32,
    pub hemisphere_intensity: f32,
    pub hemisphere_position: [f32; 3],
    pub directional_color: u32,
    pub directional_intensity: f32,
    pub directional_position: [f32; 3],
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            sky_color: 0xffffff,
            ground_color: 0x444444,
            hemisphere_intensity: 2.0,
            hemisphere_position: [0.0, 200.0, 0.0],
            directional_color: 0xffffff,
            directional_intensity: 5.0,
            directional_position: [0.0, 200.0, 100.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    pub size: f32,
    pub color: u32,
    pub grid_divisions: u32,
    pub grid_center_color: u32,
    pub grid_line_color: u32,
    pub axes_size: f32,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            size: 2000.0,
            color: 0x555555,
            grid_divisions: 40,
            grid_center_color: 0x888888,
            grid_line_color: 0x444444,
            axes_size: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub enable_damping: bool,
    pub damping_factor: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            enable_damping: true,
            damping_factor: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ViewerConfig =
            serde_json::from_str(r#"{ "resize_throttle_ms": 250, "camera": { "fov": 60.0 } }"#).unwrap();

        assert_eq!(config.resize_throttle(), Duration::from_millis(250));
        assert_eq!(config.camera.fov, 60.0);
        assert_eq!(config.camera.far, 1000.0);
        assert_eq!(config.datasets.len(), 5);
        assert_eq!(config.props.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_initial_dataset() {
        let config = ViewerConfig {
            initial_dataset: "bvh-data/missing.bvh".to_string(),
            ..ViewerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ViewerError::UnknownDataset(_))));
    }

    #[test]
    fn initial_dataset_falls_back_to_first_entry() {
        let config = ViewerConfig {
            initial_dataset: String::new(),
            ..ViewerConfig::default()
        };
        assert_eq!(config.initial_dataset().as_deref(), Some("bvh-data/crossover.bvh"));
    }
}
