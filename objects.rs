use crate::models::DetectedObject;
use crate::taxonomy::{BACKGROUND_CLASS, BACKGROUND_LABEL};
use ndarray::ArrayView2;

pub const MAX_DETECTED_OBJECTS: usize = 5;

/// Ranks the non-background classes present in `mask` by pixel coverage.
/// Equal coverage keeps taxonomy order; absent classes are left out.
pub fn summarize_objects(mask: ArrayView2<'_, u8>, labels: &[&str]) -> Vec<DetectedObject> {
    let total_pixels = mask.len();
    if total_pixels == 0 {
        return Vec::new();
    }
    let mut counts = [0usize; 256];
    for &class_idx in mask.iter() {
        counts[class_idx as usize] += 1;
    }

    let mut ranked: Vec<DetectedObject> = labels
        .iter()
        .enumerate()
        .filter(|(idx, label)| *idx != BACKGROUND_CLASS && **label != BACKGROUND_LABEL)
        .filter_map(|(idx, label)| {
            let count = counts.get(idx).copied().unwrap_or(0);
            (count > 0).then(|| DetectedObject {
                label: label.to_string(),
                coverage: count as f32 / total_pixels as f32,
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.coverage
            .partial_cmp(&a.coverage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(MAX_DETECTED_OBJECTS);
    ranked
}
