use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// Fraction of the frame's pixels carrying this label, in (0, 1].
    pub coverage: f32,
}

/// The scalar and categorical part of a frame analysis; everything except
/// the mask. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    phase: String,
    phase_probabilities: IndexMap<String, f32>,
    detected_objects: Vec<DetectedObject>,
    importance_score: f32,
    phase_score: f32,
    object_score: f32,
}

impl FrameSummary {
    pub fn new(
        phase: String,
        phase_probabilities: IndexMap<String, f32>,
        detected_objects: Vec<DetectedObject>,
        importance_score: f32,
        phase_score: f32,
        object_score: f32,
    ) -> Self {
        Self {
            phase,
            phase_probabilities,
            detected_objects,
            importance_score,
            phase_score,
            object_score,
        }
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn phase_probabilities(&self) -> &IndexMap<String, f32> {
        &self.phase_probabilities
    }

    pub fn detected_objects(&self) -> &[DetectedObject] {
        &self.detected_objects
    }

    pub fn importance_score(&self) -> f32 {
        self.importance_score
    }

    pub fn phase_score(&self) -> f32 {
        self.phase_score
    }

    pub fn object_score(&self) -> f32 {
        self.object_score
    }

    pub fn object_labels(&self) -> impl Iterator<Item = &str> {
        self.detected_objects.iter().map(|obj| obj.label.as_str())
    }
}

/// Everything computed for one analyzed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    #[serde(flatten)]
    summary: FrameSummary,
    #[serde(skip)]
    segmentation_mask: Array2<u8>,
}

impl FrameRecord {
    pub fn new(summary: FrameSummary, segmentation_mask: Array2<u8>) -> Self {
        Self {
            summary,
            segmentation_mask,
        }
    }

    pub fn summary(&self) -> &FrameSummary {
        &self.summary
    }

    /// Class indices at the input frame's resolution.
    pub fn segmentation_mask(&self) -> &Array2<u8> {
        &self.segmentation_mask
    }

    /// Splits off the mask so the summary can be kept without it.
    pub fn into_parts(self) -> (FrameSummary, Array2<u8>) {
        (self.summary, self.segmentation_mask)
    }

    pub fn phase(&self) -> &str {
        self.summary.phase()
    }

    pub fn phase_probabilities(&self) -> &IndexMap<String, f32> {
        self.summary.phase_probabilities()
    }

    pub fn detected_objects(&self) -> &[DetectedObject] {
        self.summary.detected_objects()
    }

    pub fn importance_score(&self) -> f32 {
        self.summary.importance_score()
    }

    pub fn phase_score(&self) -> f32 {
        self.summary.phase_score()
    }

    pub fn object_score(&self) -> f32 {
        self.summary.object_score()
    }
}

/// A frame summary tagged with where it sits in the source video. Masks are
/// not retained across a run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedFrame {
    pub frame_number: usize,
    pub source: String,
    pub timestamp_sec: f64,
    pub timestamp_str: String,
    #[serde(flatten)]
    pub summary: FrameSummary,
}
