//! Static label and phase tables. Their order is the column order of the
//! segmentation and phase model outputs, so entries must never be reordered.

use ndarray::{Array2, ArrayView2};

pub const BACKGROUND_CLASS: usize = 0;
pub const BACKGROUND_LABEL: &str = "background";

/// One semantic class: the code it carries in dataset mask files and its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelEntry {
    pub pixel_value: u8,
    pub label: &'static str,
}

/// A temporal phase and the share of the procedure it usually occupies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseDefinition {
    pub name: &'static str,
    pub share: f64,
}

/// CholecSeg8k mask codes. Class index is the position in this table.
pub const LABEL_TAXONOMY: &[LabelEntry] = &[
    LabelEntry { pixel_value: 0, label: BACKGROUND_LABEL },
    LabelEntry { pixel_value: 11, label: "liver" },
    LabelEntry { pixel_value: 12, label: "gallbladder" },
    LabelEntry { pixel_value: 21, label: "cystic_duct" },
    LabelEntry { pixel_value: 22, label: "cystic_artery" },
    LabelEntry { pixel_value: 23, label: "common_bile_duct" },
    LabelEntry { pixel_value: 31, label: "grasper" },
    LabelEntry { pixel_value: 32, label: "hook" },
    LabelEntry { pixel_value: 50, label: "scissors" },
];

/// Phase buckets of a laparoscopic cholecystectomy.
pub const PHASE_TAXONOMY: &[PhaseDefinition] = &[
    PhaseDefinition { name: "pre_op", share: 0.10 },
    PhaseDefinition { name: "port_setup", share: 0.10 },
    PhaseDefinition { name: "exposure", share: 0.20 },
    PhaseDefinition { name: "critical_dissection", share: 0.35 },
    PhaseDefinition { name: "clip_and_divide", share: 0.15 },
    PhaseDefinition { name: "closure", share: 0.10 },
];

pub fn num_classes() -> usize {
    LABEL_TAXONOMY.len()
}

pub fn num_phases() -> usize {
    PHASE_TAXONOMY.len()
}

pub fn label_list() -> Vec<&'static str> {
    LABEL_TAXONOMY.iter().map(|entry| entry.label).collect()
}

pub fn phase_names() -> Vec<&'static str> {
    PHASE_TAXONOMY.iter().map(|phase| phase.name).collect()
}

pub fn label_for_class(class_index: usize) -> Option<&'static str> {
    LABEL_TAXONOMY.get(class_index).map(|entry| entry.label)
}

pub fn class_for_pixel(pixel_value: u8) -> Option<usize> {
    LABEL_TAXONOMY
        .iter()
        .position(|entry| entry.pixel_value == pixel_value)
}

/// Maps normalized procedure progress (0.0 at the first frame, 1.0 at the
/// last) to the phase whose cumulative share first reaches it.
pub fn phase_from_progress(progress: f64) -> &'static str {
    let mut cumulative = 0.0;
    for phase in PHASE_TAXONOMY {
        cumulative += phase.share;
        if progress <= cumulative {
            return phase.name;
        }
    }
    PHASE_TAXONOMY[PHASE_TAXONOMY.len() - 1].name
}

/// Converts a raw dataset mask (pixel codes) into class indices. Codes
/// outside the taxonomy become background.
pub fn encode_mask(raw: ArrayView2<'_, u8>) -> Array2<u8> {
    let mut lookup = [BACKGROUND_CLASS as u8; 256];
    for (idx, entry) in LABEL_TAXONOMY.iter().enumerate() {
        lookup[entry.pixel_value as usize] = idx as u8;
    }
    raw.mapv(|code| lookup[code as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn background_is_class_zero() {
        assert_eq!(label_for_class(BACKGROUND_CLASS), Some(BACKGROUND_LABEL));
        assert_eq!(num_classes(), 9);
        assert_eq!(label_list()[8], "scissors");
        assert_eq!(label_for_class(9), None);
    }

    #[test]
    fn pixel_codes_are_unique() {
        for (i, a) in LABEL_TAXONOMY.iter().enumerate() {
            for b in &LABEL_TAXONOMY[i + 1..] {
                assert_ne!(a.pixel_value, b.pixel_value);
            }
        }
        assert_eq!(class_for_pixel(22), Some(4));
        assert_eq!(class_for_pixel(99), None);
    }

    #[test]
    fn phase_shares_sum_to_one() {
        let total: f64 = PHASE_TAXONOMY.iter().map(|p| p.share).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(phase_names()[3], "critical_dissection");
    }

    #[test]
    fn progress_maps_to_phase() {
        assert_eq!(phase_from_progress(0.0), "pre_op");
        assert_eq!(phase_from_progress(0.15), "port_setup");
        assert_eq!(phase_from_progress(0.5), "critical_dissection");
        assert_eq!(phase_from_progress(0.8), "clip_and_divide");
        assert_eq!(phase_from_progress(1.0), "closure");
        assert_eq!(phase_from_progress(1.5), "closure");
    }

    #[test]
    fn mask_codes_encode_to_indices() {
        let raw = array![[0u8, 11, 50], [22, 7, 32]];
        let encoded = encode_mask(raw.view());
        assert_eq!(encoded, array![[0u8, 1, 8], [4, 0, 7]]);
    }
}
