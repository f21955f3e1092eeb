//! Importance heuristic. Every term is a fixed, auditable constant so the
//! score can be reproduced by hand.

use crate::taxonomy::PHASE_TAXONOMY;
use indexmap::IndexMap;

/// Reporting relevance of each phase.
pub const PHASE_WEIGHTS: &[(&str, f32)] = &[
    ("pre_op", 0.2),
    ("port_setup", 0.4),
    ("exposure", 0.6),
    ("critical_dissection", 0.9),
    ("clip_and_divide", 1.0),
    ("closure", 0.5),
];
pub const DEFAULT_PHASE_WEIGHT: f32 = 0.3;

/// Clinical priority of instruments and structures.
pub const OBJECT_PRIORITIES: &[(&str, f32)] = &[
    ("cystic_duct", 1.0),
    ("cystic_artery", 1.0),
    ("common_bile_duct", 0.9),
    ("grasper", 0.6),
    ("hook", 0.5),
    ("scissors", 0.7),
    ("gallbladder", 0.8),
    ("liver", 0.4),
];
pub const DEFAULT_OBJECT_PRIORITY: f32 = 0.2;
pub const OBJECT_PRIORITY_CAP: f32 = 3.0;

pub const QUALITY_WEIGHT: f32 = 0.4;
pub const PHASE_SCORE_WEIGHT: f32 = 0.35;
pub const OBJECT_SCORE_WEIGHT: f32 = 0.25;
/// Reserved slot for a future signal; added verbatim to every frame.
pub const AI_BONUS: f32 = 0.1;

pub fn phase_weight(phase: &str) -> f32 {
    PHASE_WEIGHTS
        .iter()
        .find(|(name, _)| *name == phase)
        .map(|(_, weight)| *weight)
        .unwrap_or(DEFAULT_PHASE_WEIGHT)
}

pub fn object_priority(label: &str) -> f32 {
    OBJECT_PRIORITIES
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, priority)| *priority)
        .unwrap_or(DEFAULT_OBJECT_PRIORITY)
}

pub fn calculate_phase_score(phase_probabilities: &IndexMap<String, f32>) -> f32 {
    let score: f32 = phase_probabilities
        .iter()
        .map(|(phase, prob)| prob * phase_weight(phase))
        .sum();
    score.min(1.0)
}

/// Sums priorities over distinct labels; coverage plays no part.
pub fn calculate_object_score<'a, I>(objects: I) -> f32
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    let mut total = 0.0f32;
    for label in objects {
        if seen.contains(&label) {
            continue;
        }
        seen.push(label);
        total += object_priority(label);
    }
    total.min(OBJECT_PRIORITY_CAP) / OBJECT_PRIORITY_CAP
}

/// Combines the signals into a 0-100 importance value. `quality_score` is
/// the caller's 0-100 image quality metric.
pub fn compute_importance(quality_score: f32, phase_score: f32, object_score: f32) -> f32 {
    compute_importance_with_bonus(quality_score, phase_score, object_score, AI_BONUS)
}

pub fn compute_importance_with_bonus(
    quality_score: f32,
    phase_score: f32,
    object_score: f32,
    ai_bonus: f32,
) -> f32 {
    let normalized_quality = quality_score / 100.0;
    let combined = QUALITY_WEIGHT * normalized_quality
        + PHASE_SCORE_WEIGHT * phase_score
        + OBJECT_SCORE_WEIGHT * object_score
        + ai_bonus;
    let clamped = if combined.is_nan() {
        0.0
    } else {
        combined.clamp(0.0, 1.0)
    };
    clamped * 100.0
}

/// `1/N` for every phase; used when the classifier output does not line up
/// with the phase taxonomy.
pub fn uniform_phase_probabilities() -> IndexMap<String, f32> {
    let baseline = 1.0 / PHASE_TAXONOMY.len() as f32;
    PHASE_TAXONOMY
        .iter()
        .map(|phase| (phase.name.to_string(), baseline))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(phase: &str) -> IndexMap<String, f32> {
        PHASE_TAXONOMY
            .iter()
            .map(|p| (p.name.to_string(), if p.name == phase { 1.0 } else { 0.0 }))
            .collect()
    }

    #[test]
    fn clip_and_divide_scores_full() {
        let phase_score = calculate_phase_score(&one_hot("clip_and_divide"));
        assert!((phase_score - 1.0).abs() < 1e-6);
        let object_score = calculate_object_score(["cystic_artery"]);
        assert!((object_score - 1.0 / 3.0).abs() < 1e-6);
        // 0.32 + 0.35 + 0.0833 + 0.1: the weighted sum stays below saturation
        let importance = compute_importance(80.0, phase_score, object_score);
        assert!((importance - 85.333_33).abs() < 1e-3, "{importance}");
    }

    #[test]
    fn unknown_entries_use_defaults() {
        assert_eq!(phase_weight("suturing"), DEFAULT_PHASE_WEIGHT);
        assert_eq!(object_priority("stapler"), DEFAULT_OBJECT_PRIORITY);
        let mut probs = IndexMap::new();
        probs.insert("suturing".to_string(), 1.0);
        assert!((calculate_phase_score(&probs) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn object_score_caps_at_one() {
        let score = calculate_object_score([
            "cystic_duct",
            "cystic_artery",
            "common_bile_duct",
            "scissors",
            "gallbladder",
        ]);
        assert_eq!(score, 1.0);
        assert_eq!(calculate_object_score(std::iter::empty()), 0.0);
    }

    #[test]
    fn object_score_counts_labels_once() {
        let once = calculate_object_score(["hook"]);
        let twice = calculate_object_score(["hook", "hook"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn uniform_phase_score() {
        let probs = uniform_phase_probabilities();
        assert_eq!(probs.len(), 6);
        let total: f32 = probs.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
        // mean of the six weights
        let expected = (0.2 + 0.4 + 0.6 + 0.9 + 1.0 + 0.5) / 6.0;
        assert!((calculate_phase_score(&probs) - expected).abs() < 1e-5);
    }

    #[test]
    fn importance_is_bounded() {
        assert!((compute_importance(0.0, 0.0, 0.0) - 10.0).abs() < 1e-4);
        assert_eq!(compute_importance_with_bonus(-500.0, 0.0, 0.0, 0.1), 0.0);
        assert_eq!(compute_importance(1000.0, 1.0, 1.0), 100.0);
        let mid = compute_importance(50.0, 0.5, 0.0);
        assert!((mid - 47.5).abs() < 1e-4);
        assert_eq!(compute_importance(f32::NAN, 0.0, 0.0), 0.0);
    }
}
