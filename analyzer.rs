use crate::backend::{
    load_or_untrained, select_segmentation_backend, BackendKind, BackendRequest, ModelLoader,
    OnnxLoader, SegmentationBackend,
};
use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::inference::{run_dual, InferenceModel, UntrainedHead};
use crate::models::{FrameRecord, FrameSummary};
use crate::objects::summarize_objects;
use crate::preprocess::{frame_from_image, preprocess_frame, resize_mask_nearest};
use crate::preview::{self, Palette};
use crate::ranking::{
    calculate_object_score, calculate_phase_score, compute_importance,
    uniform_phase_probabilities,
};
use crate::taxonomy::{self, PHASE_TAXONOMY};
use image::RgbImage;
use indexmap::IndexMap;
use ndarray::{Array2, Array4, ArrayView2, ArrayViewD};
use std::path::Path;

const PHASE_MODEL_LABEL: &str = "phase";

/// Segmentation and phase networks plus the scoring heuristic. Built once;
/// `analyze_frame` takes `&self` and may be called from several threads.
pub struct SurgicalSceneAnalyzer {
    config: AnalyzerConfig,
    backend: SegmentationBackend,
    phase_model: Box<dyn InferenceModel>,
    labels: Vec<&'static str>,
    diagnostics: Vec<String>,
}

impl SurgicalSceneAnalyzer {
    /// Builds the analyzer from ONNX checkpoints, honouring the EndoViT
    /// environment toggle.
    pub fn new(mut config: AnalyzerConfig) -> Result<Self> {
        config.apply_env_overrides();
        let loader = OnnxLoader::new(config.runtime_config());
        Self::with_loader(config, &loader)
    }

    pub fn with_loader(config: AnalyzerConfig, loader: &dyn ModelLoader) -> Result<Self> {
        config.validate()?;
        let advanced = config.endovit_checkpoint();
        let default = config.segmentation_checkpoint();
        let selection = select_segmentation_backend(
            &BackendRequest {
                advanced_checkpoint: advanced.as_deref(),
                default_checkpoint: &default,
                num_classes: taxonomy::num_classes(),
            },
            loader,
        );
        let mut diagnostics = selection.diagnostics;
        let phase_model = load_or_untrained(
            loader,
            &config.phase_checkpoint(),
            PHASE_MODEL_LABEL,
            || UntrainedHead::classifier(PHASE_MODEL_LABEL, taxonomy::num_phases()),
            &mut diagnostics,
        );
        Self::assemble(config, selection.backend, phase_model, diagnostics)
    }

    /// Wraps already constructed networks, skipping checkpoint discovery.
    pub fn from_models(
        config: AnalyzerConfig,
        backend: SegmentationBackend,
        phase_model: Box<dyn InferenceModel>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, backend, phase_model, Vec::new())
    }

    fn assemble(
        config: AnalyzerConfig,
        backend: SegmentationBackend,
        phase_model: Box<dyn InferenceModel>,
        diagnostics: Vec<String>,
    ) -> Result<Self> {
        log::info!(
            "Analyzer ready: backend={}, image_size={}, {} labels",
            backend.kind(),
            config.image_size,
            taxonomy::num_classes()
        );
        Ok(Self {
            config,
            backend,
            phase_model,
            labels: taxonomy::label_list(),
            diagnostics,
        })
    }

    pub fn segmentation_backend(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn label_list(&self) -> &[&'static str] {
        &self.labels
    }

    /// Device the segmentation network resolved to.
    pub fn device(&self) -> &str {
        self.backend.device()
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Warnings collected while choosing and loading the networks.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn preprocess_image(&self, frame: ArrayViewD<'_, u8>) -> Result<Array4<f32>> {
        preprocess_frame(frame, self.config.image_size as usize)
    }

    /// Analyzes one `H x W x 3` frame. `quality_score` is an externally
    /// computed 0-100 image quality value.
    pub fn analyze_frame(&self, frame: ArrayViewD<'_, u8>, quality_score: f32) -> Result<FrameRecord> {
        let tensor = self.preprocess_image(frame.view())?;
        let (height, width) = (frame.shape()[0], frame.shape()[1]);
        let output = run_dual(
            &self.backend,
            self.phase_model.as_ref(),
            tensor.view(),
            self.config.parallel_inference,
        )?;
        let phase_probabilities = phase_probability_map(&output.phase_probabilities);
        let mask = resize_mask_nearest(output.mask.view(), width, height);
        Ok(assemble_record(
            phase_probabilities,
            mask,
            &self.labels,
            quality_score,
        ))
    }

    pub fn analyze_image(&self, img: &RgbImage, quality_score: f32) -> Result<FrameRecord> {
        let frame = frame_from_image(img)?;
        self.analyze_frame(frame.view().into_dyn(), quality_score)
    }

    pub fn save_mask_preview(
        &self,
        mask: ArrayView2<'_, u8>,
        output_path: &Path,
        palette: &Palette,
    ) -> Result<()> {
        preview::save_mask_preview(mask, output_path, palette, self.labels.len())
    }
}

/// Pairs classifier probabilities with phase names. Any length mismatch with
/// the phase taxonomy yields the uniform distribution instead.
pub fn phase_probability_map(probs: &[f32]) -> IndexMap<String, f32> {
    if probs.len() != PHASE_TAXONOMY.len() {
        log::warn!(
            "Phase model returned {} scores for {} phases; using uniform distribution",
            probs.len(),
            PHASE_TAXONOMY.len()
        );
        return uniform_phase_probabilities();
    }
    PHASE_TAXONOMY
        .iter()
        .zip(probs)
        .map(|(phase, prob)| (phase.name.to_string(), *prob))
        .collect()
}

/// Highest-probability phase; the earliest phase wins a tie.
pub fn top_phase(phase_probabilities: &IndexMap<String, f32>) -> String {
    let mut best: Option<(&String, f32)> = None;
    for (phase, prob) in phase_probabilities {
        match best {
            Some((_, best_prob)) if *prob <= best_prob => {}
            _ => best = Some((phase, *prob)),
        }
    }
    best.map(|(phase, _)| phase.clone()).unwrap_or_default()
}

/// Packages the per-frame outputs and derived scores into one record.
pub fn assemble_record(
    phase_probabilities: IndexMap<String, f32>,
    segmentation_mask: Array2<u8>,
    labels: &[&str],
    quality_score: f32,
) -> FrameRecord {
    let detected_objects = summarize_objects(segmentation_mask.view(), labels);
    let phase_score = calculate_phase_score(&phase_probabilities);
    let object_score = calculate_object_score(detected_objects.iter().map(|o| o.label.as_str()));
    let importance_score = compute_importance(quality_score, phase_score, object_score);
    let summary = FrameSummary::new(
        top_phase(&phase_probabilities),
        phase_probabilities,
        detected_objects,
        importance_score,
        phase_score,
        object_score,
    );
    FrameRecord::new(summary, segmentation_mask)
}
