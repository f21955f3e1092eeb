use crate::error::{Error, Result};
use crate::inference::InferenceModel;
use ndarray::{ArrayD, ArrayView4, IxDyn};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

#[cfg(target_os = "windows")]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};

/// Input names exported by the training scripts and common converters.
const KNOWN_INPUT_NAMES: &[&str] = &["input", "pixel_values", "images"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InferenceProvider {
    Cpu,
    DirectML { device_id: u32 },
}

impl InferenceProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectML { .. } => "GPU (DirectML)",
        }
    }

    pub fn device_id(self) -> Option<u32> {
        match self {
            Self::DirectML { device_id } => Some(device_id),
            Self::Cpu => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    #[default]
    Auto,
    CpuOnly,
    DirectMLOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct OrtRuntimeConfig {
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
}

impl OrtRuntimeConfig {
    fn resolved_device_id(self) -> u32 {
        self.device_id.unwrap_or(0)
    }
}

fn ort_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "onnxruntime.dll"
    } else if cfg!(target_os = "macos") {
        "libonnxruntime.dylib"
    } else {
        "libonnxruntime.so"
    }
}

fn ort_candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            candidates.push(parent.join("onnxruntime").join(ort_library_name()));
            candidates.push(parent.join(ort_library_name()));
        }
    }
    candidates
}

fn pick_ort_library(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|candidate| candidate.exists())
}

/// Points the dynamically loaded runtime at the first library found next to
/// the executable, unless `ORT_DYLIB_PATH` already names one.
fn configure_dylib_path() {
    if let Some(path) = pick_ort_library(ort_candidate_paths()) {
        log::debug!("Using ONNX Runtime library {}", path.display());
        std::env::set_var("ORT_DYLIB_PATH", path);
    }
}

fn ensure_environment() -> Result<()> {
    configure_dylib_path();
    let build = || {
        Ok::<bool, Error>(ort::init().with_name("surgical-scene").commit())
    };
    match catch_unwind(AssertUnwindSafe(build)) {
        Ok(res) => {
            if res? {
                log::debug!("ONNX Runtime environment committed");
            }
            Ok(())
        }
        Err(_) => Err(Error::Init(
            "ONNX Runtime could not be loaded (set ORT_DYLIB_PATH)".into(),
        )),
    }
}

/// Whether the ONNX Runtime environment can be initialised in this process.
pub fn runtime_support() -> std::result::Result<(), String> {
    ensure_environment().map_err(|e| e.to_string())
}

fn init_err(e: impl std::fmt::Display) -> Error {
    Error::Init(e.to_string())
}

/// Opens one session on `provider`. A panic inside the runtime becomes an
/// `Init` error.
fn open_session(model_path: &Path, provider: InferenceProvider) -> Result<Session> {
    let open = || -> Result<Session> {
        let builder = Session::builder()
            .map_err(init_err)?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(init_err)?
            .with_parallel_execution(false)
            .map_err(init_err)?;
        let mut builder = match provider {
            InferenceProvider::Cpu => builder,
            InferenceProvider::DirectML { device_id } => attach_directml(builder, device_id)?,
        };
        builder.commit_from_file(model_path).map_err(init_err)
    };
    catch_unwind(AssertUnwindSafe(open)).unwrap_or_else(|_| {
        Err(Error::Init(format!(
            "ONNX Runtime panicked while opening {}",
            model_path.display()
        )))
    })
}

#[cfg(target_os = "windows")]
fn attach_directml(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    let ep = DirectMLExecutionProvider::default()
        .with_device_id(device_id as i32)
        .build();
    builder
        .with_memory_pattern(false)
        .map_err(init_err)?
        .with_execution_providers([ep])
        .map_err(init_err)
}

#[cfg(not(target_os = "windows"))]
fn attach_directml(_builder: SessionBuilder, _device_id: u32) -> Result<SessionBuilder> {
    Err(Error::Init("DirectML requires Windows".into()))
}

#[cfg(target_os = "windows")]
fn directml_available() -> bool {
    matches!(DirectMLExecutionProvider::default().is_available(), Ok(true))
}

#[cfg(not(target_os = "windows"))]
fn directml_available() -> bool {
    false
}

/// Opens `model_path` on DirectML when requested and usable, otherwise on
/// the CPU.
pub fn build_session(
    model_path: &Path,
    cfg: OrtRuntimeConfig,
) -> Result<(Session, InferenceProvider)> {
    if !model_path.exists() {
        return Err(Error::Init(format!(
            "Model not found: {}",
            model_path.display()
        )));
    }
    ensure_environment()?;

    if matches!(cfg.provider, ProviderChoice::Auto | ProviderChoice::DirectMLOnly) {
        let dml = InferenceProvider::DirectML {
            device_id: cfg.resolved_device_id(),
        };
        if directml_available() {
            match open_session(model_path, dml) {
                Ok(session) => return Ok((session, dml)),
                Err(err) => log::warn!("DirectML session failed: {err}"),
            }
        }
        log::warn!(
            "DirectML unavailable; running {} on CPU",
            model_path.display()
        );
    }

    let session = open_session(model_path, InferenceProvider::Cpu)?;
    Ok((session, InferenceProvider::Cpu))
}

/// A network loaded from an `.onnx` file. The session is locked for the
/// duration of each run; weights are never mutated.
pub struct OnnxModel {
    label: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    provider: InferenceProvider,
    diagnostics: Vec<String>,
}

impl OnnxModel {
    pub fn load(model_path: &Path, cfg: OrtRuntimeConfig, label: &str) -> Result<Self> {
        let (session, provider) = build_session(model_path, cfg)?;
        let mut diagnostics = Vec::new();

        let input_names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let input_name = match pick_input_name(&input_names) {
            Some((name, true)) => name,
            Some((name, false)) => {
                diagnostics.push(format!(
                    "{label}: no conventional input name in {input_names:?}; using '{name}'"
                ));
                name
            }
            None => {
                return Err(Error::Init(format!(
                    "{label} model {} declares no inputs",
                    model_path.display()
                )))
            }
        };
        let output_name = output_names.first().cloned().ok_or_else(|| {
            Error::Init(format!(
                "{label} model {} declares no outputs",
                model_path.display()
            ))
        })?;
        if output_names.len() > 1 {
            diagnostics.push(format!(
                "{label}: ignoring extra outputs {:?}",
                &output_names[1..]
            ));
        }
        for line in &diagnostics {
            log::warn!("{line}");
        }
        log::info!(
            "Loaded {label} model {} on {}",
            model_path.display(),
            provider.label()
        );

        Ok(Self {
            label: label.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            provider,
            diagnostics,
        })
    }

}

fn pick_input_name(names: &[String]) -> Option<(String, bool)> {
    if let Some(name) = names
        .iter()
        .find(|name| KNOWN_INPUT_NAMES.contains(&name.as_str()))
    {
        return Some((name.clone(), true));
    }
    names.first().map(|name| (name.clone(), false))
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.label
    }

    fn device(&self) -> &str {
        self.provider.label()
    }

    fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let run = || -> Result<ArrayD<f32>> {
            let tensor = Tensor::from_array(input.to_owned())
                .map_err(|e| Error::Inference(format!("Invalid {} input: {e}", self.label)))?;
            let mut session = self
                .session
                .lock()
                .map_err(|_| Error::Inference(format!("{} session lock poisoned", self.label)))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .map_err(|e| Error::Inference(format!("Failed to run {} model: {e}", self.label)))?;
            let (shape, data) = outputs[self.output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(format!("Bad {} output: {e}", self.label)))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
        };
        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(res) => res,
            Err(_) => Err(Error::Inference(format!(
                "ONNX Runtime panicked while running {}",
                self.label
            ))),
        }
    }
}

pub fn ort_runtime_version() -> Option<String> {
    if runtime_support().is_err() {
        return None;
    }
    let info = ort::info();
    if let Some(start) = info.find("git-branch=rel-") {
        let tail = &info[start + "git-branch=rel-".len()..];
        if let Some(end) = tail.find(',') {
            return Some(tail[..end].to_string());
        }
        return Some(tail.to_string());
    }
    Some(format!("1.{}.x", ort::MINOR_VERSION))
}
