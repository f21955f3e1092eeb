use crate::error::{Error, Result};
use crate::onnx::{OrtRuntimeConfig, ProviderChoice};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const ENDOVIT_TOGGLE_ENV: &str = "SURGICAL_SCENE_ENABLE_ENDOVIT";
const ENDOVIT_DEFAULT_FILE: &str = "endovit_seg.onnx";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Square edge length every frame is resized to before inference. Must
    /// match the value the checkpoints were trained with.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_segmentation_model")]
    pub segmentation_model_path: PathBuf,
    #[serde(default = "default_phase_model")]
    pub phase_model_path: PathBuf,
    #[serde(default)]
    pub endovit_segmentation_model_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub endovit_enabled: bool,
    #[serde(default)]
    pub provider: ProviderChoice,
    #[serde(default)]
    pub device_id: Option<u32>,
    #[serde(default = "default_true")]
    pub parallel_inference: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            image_size: default_image_size(),
            segmentation_model_path: default_segmentation_model(),
            phase_model_path: default_phase_model(),
            endovit_segmentation_model_path: None,
            endovit_enabled: true,
            provider: ProviderChoice::Auto,
            device_id: None,
            parallel_inference: true,
        }
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_image_size() -> u32 {
    512
}

fn default_segmentation_model() -> PathBuf {
    PathBuf::from("segmentation_unet.onnx")
}

fn default_phase_model() -> PathBuf {
    PathBuf::from("phase_classifier.onnx")
}

fn default_true() -> bool {
    true
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(Error::Config("image_size must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn resolve_model(&self, name: &Path) -> PathBuf {
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.artifacts_dir.join(name)
        }
    }

    pub fn segmentation_checkpoint(&self) -> PathBuf {
        self.resolve_model(&self.segmentation_model_path)
    }

    pub fn phase_checkpoint(&self) -> PathBuf {
        self.resolve_model(&self.phase_model_path)
    }

    /// Configured ViT checkpoint, or `endovit_seg.onnx` in the artifacts
    /// directory when nothing was configured and that file exists.
    pub fn endovit_checkpoint(&self) -> Option<PathBuf> {
        if !self.endovit_enabled {
            return None;
        }
        match &self.endovit_segmentation_model_path {
            Some(path) => Some(self.resolve_model(path)),
            None => {
                let candidate = self.artifacts_dir.join(ENDOVIT_DEFAULT_FILE);
                candidate.exists().then_some(candidate)
            }
        }
    }

    pub fn runtime_config(&self) -> OrtRuntimeConfig {
        OrtRuntimeConfig {
            provider: self.provider,
            device_id: self.device_id,
        }
    }

    pub fn apply_env_overrides(&mut self) {
        let value = env::var(ENDOVIT_TOGGLE_ENV).ok();
        if let Some(enabled) = parse_toggle(value.as_deref()) {
            if !enabled {
                log::info!("EndoViT backend disabled through {ENDOVIT_TOGGLE_ENV}");
            }
            self.endovit_enabled = enabled;
        }
    }
}

fn parse_toggle(value: Option<&str>) -> Option<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "0" || v == "false" => Some(false),
        Some(v) if v == "1" || v == "true" => Some(true),
        Some(_) => Some(true),
        None => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl Settings {
    /// Reads settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No settings at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&data)?;
        settings.analyzer.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
