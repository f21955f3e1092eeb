use crate::error::Result;
use crate::inference::{InferenceModel, UntrainedHead};
use crate::onnx::{self, OnnxModel, OrtRuntimeConfig};
use ndarray::{ArrayD, ArrayView4};
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Unet,
    EndoVit,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unet => "unet",
            Self::EndoVit => "endovit",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The segmentation network in use. Chosen once when the analyzer is built.
pub enum SegmentationBackend {
    Unet(Box<dyn InferenceModel>),
    EndoVit(Box<dyn InferenceModel>),
}

impl SegmentationBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Unet(_) => BackendKind::Unet,
            Self::EndoVit(_) => BackendKind::EndoVit,
        }
    }

    fn model(&self) -> &dyn InferenceModel {
        match self {
            Self::Unet(model) | Self::EndoVit(model) => model.as_ref(),
        }
    }
}

impl InferenceModel for SegmentationBackend {
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        self.model().forward(input)
    }

    fn device(&self) -> &str {
        self.model().device()
    }

    fn diagnostics(&self) -> &[String] {
        self.model().diagnostics()
    }
}

/// Source of network implementations. `runtime_support` reports whether the
/// machinery the advanced backend needs is usable in this process.
pub trait ModelLoader {
    fn runtime_support(&self) -> std::result::Result<(), String>;

    fn load(&self, path: &Path, label: &str) -> Result<Box<dyn InferenceModel>>;
}

pub struct OnnxLoader {
    runtime: OrtRuntimeConfig,
}

impl OnnxLoader {
    pub fn new(runtime: OrtRuntimeConfig) -> Self {
        Self { runtime }
    }
}

impl ModelLoader for OnnxLoader {
    fn runtime_support(&self) -> std::result::Result<(), String> {
        onnx::runtime_support()
    }

    fn load(&self, path: &Path, label: &str) -> Result<Box<dyn InferenceModel>> {
        Ok(Box::new(OnnxModel::load(path, self.runtime, label)?))
    }
}

pub struct BackendRequest<'a> {
    pub advanced_checkpoint: Option<&'a Path>,
    pub default_checkpoint: &'a Path,
    pub num_classes: usize,
}

pub struct BackendSelection {
    pub backend: SegmentationBackend,
    pub diagnostics: Vec<String>,
}

/// Picks the segmentation backend. Never fails: every problem with the
/// advanced backend degrades to the default one and is returned as a
/// diagnostic.
pub fn select_segmentation_backend(
    request: &BackendRequest<'_>,
    loader: &dyn ModelLoader,
) -> BackendSelection {
    let mut diagnostics = Vec::new();

    match request.advanced_checkpoint {
        Some(path) if path.exists() => match loader.runtime_support() {
            Ok(()) => match loader.load(path, BackendKind::EndoVit.as_str()) {
                Ok(model) => {
                    diagnostics.extend(model.diagnostics().iter().cloned());
                    log::info!("Segmentation backend: endovit ({})", path.display());
                    return BackendSelection {
                        backend: SegmentationBackend::EndoVit(model),
                        diagnostics,
                    };
                }
                Err(err) => {
                    warn_into(
                        &mut diagnostics,
                        format!("Failed to initialize EndoViT segmentation: {err}"),
                    );
                }
            },
            Err(reason) => {
                warn_into(
                    &mut diagnostics,
                    format!("EndoViT checkpoint detected but dependencies are missing. {reason}"),
                );
            }
        },
        Some(path) => {
            warn_into(
                &mut diagnostics,
                format!("EndoViT checkpoint not found: {}", path.display()),
            );
        }
        None => {}
    }

    let model = load_or_untrained(
        loader,
        request.default_checkpoint,
        BackendKind::Unet.as_str(),
        || UntrainedHead::segmentation(BackendKind::Unet.as_str(), request.num_classes),
        &mut diagnostics,
    );
    log::info!("Segmentation backend: unet");
    BackendSelection {
        backend: SegmentationBackend::Unet(model),
        diagnostics,
    }
}

/// Loads `path` when it exists; otherwise, or on failure, falls back to the
/// untrained head built by `fallback`.
pub fn load_or_untrained<F>(
    loader: &dyn ModelLoader,
    path: &Path,
    label: &str,
    fallback: F,
    diagnostics: &mut Vec<String>,
) -> Box<dyn InferenceModel>
where
    F: FnOnce() -> UntrainedHead,
{
    if path.exists() {
        match loader.load(path, label) {
            Ok(model) => {
                diagnostics.extend(model.diagnostics().iter().cloned());
                return model;
            }
            Err(err) => warn_into(
                diagnostics,
                format!("Failed to load {label} weights from {}: {err}", path.display()),
            ),
        }
    } else {
        warn_into(
            diagnostics,
            format!("{label} weights not found at {}; using untrained head", path.display()),
        );
    }
    Box::new(fallback())
}

fn warn_into(diagnostics: &mut Vec<String>, message: String) {
    log::warn!("{message}");
    diagnostics.push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::Array4;
    use std::path::PathBuf;

    struct Ones;

    impl InferenceModel for Ones {
        fn name(&self) -> &str {
            "ones"
        }

        fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
            let (_, _, h, w) = input.dim();
            Ok(ArrayD::ones(vec![1, 2, h, w]))
        }
    }

    struct OnGpu;

    impl InferenceModel for OnGpu {
        fn name(&self) -> &str {
            "on-gpu"
        }

        fn device(&self) -> &str {
            "GPU (DirectML)"
        }

        fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
            Ones.forward(input)
        }
    }

    struct FakeLoader {
        supported: bool,
        fail: bool,
    }

    impl ModelLoader for FakeLoader {
        fn runtime_support(&self) -> std::result::Result<(), String> {
            if self.supported {
                Ok(())
            } else {
                Err("runtime library missing".into())
            }
        }

        fn load(&self, _path: &Path, _label: &str) -> Result<Box<dyn InferenceModel>> {
            if self.fail {
                Err(Error::Init("incompatible graph".into()))
            } else {
                Ok(Box::new(Ones))
            }
        }
    }

    fn touch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, b"weights").unwrap();
        path
    }

    fn missing(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_advanced_checkpoint_uses_unet() {
        let advanced = missing("ss_backend_missing_endovit.onnx");
        let default = missing("ss_backend_missing_unet.onnx");
        let request = BackendRequest {
            advanced_checkpoint: Some(advanced.as_path()),
            default_checkpoint: &default,
            num_classes: 9,
        };
        let loader = FakeLoader {
            supported: true,
            fail: false,
        };
        let selection = select_segmentation_backend(&request, &loader);
        assert_eq!(selection.backend.kind(), BackendKind::Unet);
        assert_eq!(selection.diagnostics.len(), 2);

        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        let logits = selection.backend.forward(tensor.view()).unwrap();
        assert_eq!(logits.shape(), &[1, 9, 4, 4]);
    }

    #[test]
    fn advanced_checkpoint_selected_when_supported() {
        let advanced = touch("ss_backend_ok_endovit.onnx");
        let default = missing("ss_backend_ok_unet.onnx");
        let request = BackendRequest {
            advanced_checkpoint: Some(advanced.as_path()),
            default_checkpoint: &default,
            num_classes: 9,
        };
        let loader = FakeLoader {
            supported: true,
            fail: false,
        };
        let selection = select_segmentation_backend(&request, &loader);
        assert_eq!(selection.backend.kind(), BackendKind::EndoVit);
        assert_eq!(selection.backend.name(), "endovit");
        assert!(selection.diagnostics.is_empty());
    }

    #[test]
    fn construction_failure_falls_back() {
        let advanced = touch("ss_backend_bad_endovit.onnx");
        let default = missing("ss_backend_bad_unet.onnx");
        let request = BackendRequest {
            advanced_checkpoint: Some(advanced.as_path()),
            default_checkpoint: &default,
            num_classes: 9,
        };
        let loader = FakeLoader {
            supported: true,
            fail: true,
        };
        let selection = select_segmentation_backend(&request, &loader);
        assert_eq!(selection.backend.kind(), BackendKind::Unet);
        assert!(selection.diagnostics[0].contains("incompatible graph"));
    }

    #[test]
    fn missing_dependencies_fall_back() {
        let advanced = touch("ss_backend_nodeps_endovit.onnx");
        let default = touch("ss_backend_nodeps_unet.onnx");
        let request = BackendRequest {
            advanced_checkpoint: Some(advanced.as_path()),
            default_checkpoint: &default,
            num_classes: 9,
        };
        let loader = FakeLoader {
            supported: false,
            fail: false,
        };
        let selection = select_segmentation_backend(&request, &loader);
        assert_eq!(selection.backend.kind(), BackendKind::Unet);
        assert_eq!(selection.diagnostics.len(), 1);
        assert!(selection.diagnostics[0].contains("dependencies are missing"));
        // default weights existed and loaded
        let tensor = Array4::<f32>::zeros((1, 3, 2, 2));
        let logits = selection.backend.forward(tensor.view()).unwrap();
        assert_eq!(logits.shape(), &[1, 2, 2, 2]);
    }

    #[test]
    fn no_advanced_checkpoint_is_silent() {
        let default = touch("ss_backend_plain_unet.onnx");
        let request = BackendRequest {
            advanced_checkpoint: None,
            default_checkpoint: &default,
            num_classes: 9,
        };
        let loader = FakeLoader {
            supported: true,
            fail: false,
        };
        let selection = select_segmentation_backend(&request, &loader);
        assert_eq!(selection.backend.kind(), BackendKind::Unet);
        assert!(selection.diagnostics.is_empty());
    }

    #[test]
    fn backend_reports_wrapped_device() {
        let gpu = SegmentationBackend::EndoVit(Box::new(OnGpu));
        assert_eq!(gpu.device(), "GPU (DirectML)");
        let cpu = SegmentationBackend::Unet(Box::new(Ones));
        assert_eq!(cpu.device(), "CPU");
    }
}
