use crate::error::{Error, Result};
use crate::preprocess::resize_bilinear;
use ndarray::{Array2, Array3, ArrayD, ArrayView4, Axis, Ix3};

/// The single capability both networks expose: logits for a preprocessed
/// `1 x 3 x H x W` tensor. Implementations must be deterministic.
pub trait InferenceModel: Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>>;

    /// Compute device the model runs on.
    fn device(&self) -> &str {
        "CPU"
    }

    /// Non-fatal load-time findings, such as unmatched tensor names.
    fn diagnostics(&self) -> &[String] {
        &[]
    }
}

/// Stand-in for a network whose weights could not be loaded. Emits zero
/// logits: every pixel resolves to background and the phase softmax is
/// uniform.
pub struct UntrainedHead {
    label: String,
    classes: usize,
    dense: bool,
}

impl UntrainedHead {
    pub fn segmentation(label: &str, classes: usize) -> Self {
        Self {
            label: label.to_string(),
            classes,
            dense: true,
        }
    }

    pub fn classifier(label: &str, classes: usize) -> Self {
        Self {
            label: label.to_string(),
            classes,
            dense: false,
        }
    }
}

impl InferenceModel for UntrainedHead {
    fn name(&self) -> &str {
        &self.label
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let (batch, _, h, w) = input.dim();
        let shape = if self.dense {
            vec![batch, self.classes, h, w]
        } else {
            vec![batch, self.classes]
        };
        Ok(ArrayD::zeros(shape))
    }
}

#[derive(Debug, Clone)]
pub struct DualOutput {
    pub mask: Array2<u8>,
    pub phase_probabilities: Vec<f32>,
}

/// Runs both networks over the same tensor. With `parallel` set the phase
/// classifier runs on a scoped worker thread; results are identical either
/// way.
pub fn run_dual(
    segmenter: &dyn InferenceModel,
    classifier: &dyn InferenceModel,
    tensor: ArrayView4<'_, f32>,
    parallel: bool,
) -> Result<DualOutput> {
    let (_, _, height, width) = tensor.dim();
    let (seg_logits, phase_logits) = if parallel {
        std::thread::scope(|scope| {
            let phase = scope.spawn(|| classifier.forward(tensor));
            let seg = segmenter.forward(tensor);
            let phase = phase.join().map_err(|_| {
                Error::Inference(format!("{} worker panicked", classifier.name()))
            });
            (seg, phase.and_then(|res| res))
        })
    } else {
        (segmenter.forward(tensor), classifier.forward(tensor))
    };

    let mask = segmentation_mask(seg_logits?, height, width)?;
    let phase_probabilities = softmax(phase_logits?.as_slice_memory_order().unwrap_or(&[]));
    log::debug!(
        "{} produced {}x{} mask; {} gave {} phase scores",
        segmenter.name(),
        height,
        width,
        classifier.name(),
        phase_probabilities.len()
    );
    Ok(DualOutput {
        mask,
        phase_probabilities,
    })
}

/// Per-pixel arg-max over `[1, C, h, w]` (or `[C, h, w]`) logits, upsampled
/// to `height x width` first when the network works at a coarser stride.
/// Ties resolve to the lowest class index.
pub fn segmentation_mask(logits: ArrayD<f32>, height: usize, width: usize) -> Result<Array2<u8>> {
    let logits: Array3<f32> = match logits.ndim() {
        4 if logits.shape()[0] == 1 => logits.index_axis_move(Axis(0), 0).into_dimensionality::<Ix3>()?,
        3 => logits.into_dimensionality::<Ix3>()?,
        _ => {
            return Err(Error::Inference(format!(
                "segmentation logits must be [1, C, H, W], got {:?}",
                logits.shape()
            )))
        }
    };
    let (classes, h, w) = logits.dim();
    if classes == 0 || classes > u8::MAX as usize + 1 {
        return Err(Error::Inference(format!(
            "unsupported segmentation class count {classes}"
        )));
    }
    let logits = if (h, w) != (height, width) {
        resize_bilinear(logits.view(), height, width)
    } else {
        logits
    };

    let mut mask = Array2::<u8>::zeros((height, width));
    for ((y, x), slot) in mask.indexed_iter_mut() {
        let mut best = 0usize;
        let mut best_val = f32::NEG_INFINITY;
        for c in 0..classes {
            let v = logits[[c, y, x]];
            if v > best_val {
                best_val = v;
                best = c;
            }
        }
        *slot = best as u8;
    }
    Ok(mask)
}

/// Probabilities that always sum to one. NaN logits give the uniform
/// distribution; `+inf` logits share all of the mass.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = || vec![1.0 / n as f32; n];
    if values.iter().any(|v| v.is_nan()) {
        log::warn!("NaN in {n} logits; using uniform distribution");
        return uniform();
    }
    let max_val = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::INFINITY {
        let winners = values.iter().filter(|v| **v == f32::INFINITY).count() as f32;
        return values
            .iter()
            .map(|v| if *v == f32::INFINITY { 1.0 / winners } else { 0.0 })
            .collect();
    }
    if max_val == f32::NEG_INFINITY {
        return uniform();
    }
    // the arg-max term is exp(0) = 1, so the sum is at least 1
    let exps: Vec<f32> = values.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
