//! Run-level aggregation over already analyzed frames. Nothing here touches
//! the networks; every function is a pure fold over a slice of records.

use crate::backend::BackendKind;
use crate::models::{AnalyzedFrame, DetectedObject};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

const DESCRIPTION_OBJECTS: usize = 3;
const DEFAULT_OBJECT_PHRASE: &str = "key anatomical landmarks";

/// `mm:ss.ss`; minutes are not wrapped into hours.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor();
    let secs = seconds - minutes * 60.0;
    format!("{:02}:{:05.2}", minutes as u64, secs)
}

/// Indices of the `n` most important frames. Equal scores keep frame order.
pub fn top_key_frames(frames: &[AnalyzedFrame], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..frames.len()).collect();
    order.sort_by(|&a, &b| {
        frames[b]
            .summary
            .importance_score()
            .partial_cmp(&frames[a].summary.importance_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(n);
    order
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseShare {
    pub count: usize,
    pub percentage: f32,
}

/// Frames per predicted phase, most common first.
pub fn phase_distribution(frames: &[AnalyzedFrame]) -> IndexMap<String, PhaseShare> {
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for frame in frames {
        *counts.entry(frame.summary.phase().to_string()).or_insert(0) += 1;
    }
    counts.sort_by(|_, a, _, b| b.cmp(a));
    let total = frames.len().max(1) as f32;
    counts
        .into_iter()
        .map(|(phase, count)| {
            let share = PhaseShare {
                count,
                percentage: count as f32 / total * 100.0,
            };
            (phase, share)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectStatistics {
    pub object: String,
    pub appearances: usize,
    pub avg_coverage: f32,
    pub total_coverage: f32,
}

/// Appearance counts and coverage per detected label, most frequent first.
pub fn object_statistics(frames: &[AnalyzedFrame]) -> Vec<ObjectStatistics> {
    let mut totals: IndexMap<&str, (usize, f32)> = IndexMap::new();
    for frame in frames {
        for obj in frame.summary.detected_objects() {
            let entry = totals.entry(obj.label.as_str()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += obj.coverage;
        }
    }
    let mut stats: Vec<ObjectStatistics> = totals
        .into_iter()
        .map(|(object, (appearances, total_coverage))| ObjectStatistics {
            object: object.to_string(),
            appearances,
            avg_coverage: total_coverage / appearances as f32,
            total_coverage,
        })
        .collect();
    stats.sort_by(|a, b| b.appearances.cmp(&a.appearances));
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceSummary {
    pub mean: f32,
    pub max: f32,
    pub min: f32,
    pub peak_frame: usize,
}

pub fn importance_summary(frames: &[AnalyzedFrame]) -> Option<ImportanceSummary> {
    let first = frames.first()?;
    let mut summary = ImportanceSummary {
        mean: 0.0,
        max: first.summary.importance_score(),
        min: first.summary.importance_score(),
        peak_frame: first.frame_number,
    };
    let mut total = 0.0f32;
    for frame in frames {
        let score = frame.summary.importance_score();
        total += score;
        if score > summary.max {
            summary.max = score;
            summary.peak_frame = frame.frame_number;
        }
        summary.min = summary.min.min(score);
    }
    summary.mean = total / frames.len() as f32;
    Some(summary)
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Three-line description for a key frame built only from its record.
pub fn fallback_description(frame: &AnalyzedFrame) -> String {
    let objects = frame.summary.detected_objects();
    let names = if objects.is_empty() {
        DEFAULT_OBJECT_PHRASE.to_string()
    } else {
        objects
            .iter()
            .take(DESCRIPTION_OBJECTS)
            .map(|obj| obj.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "{} view with {}\nPhase: {}\nImportance score {:.1}; review instrument positioning",
        frame.timestamp_str,
        names,
        title_case(frame.summary.phase()),
        frame.summary.importance_score()
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyFrame {
    pub rank: usize,
    pub frame_number: usize,
    pub source: String,
    pub phase: String,
    pub importance_score: f32,
    pub detected_objects: Vec<DetectedObject>,
    pub timestamp_sec: f64,
    pub timestamp_str: String,
    pub description: String,
}

impl KeyFrame {
    fn from_frame(rank: usize, frame: &AnalyzedFrame) -> Self {
        Self {
            rank,
            frame_number: frame.frame_number,
            source: frame.source.clone(),
            phase: frame.summary.phase().to_string(),
            importance_score: frame.summary.importance_score(),
            detected_objects: frame
                .summary
                .detected_objects()
                .iter()
                .take(DESCRIPTION_OBJECTS)
                .cloned()
                .collect(),
            timestamp_sec: frame.timestamp_sec,
            timestamp_str: frame.timestamp_str.clone(),
            description: fallback_description(frame),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub segmentation_backend: BackendKind,
    pub diagnostics: Vec<String>,
    pub frames_analyzed: usize,
    pub importance: Option<ImportanceSummary>,
    pub phase_distribution: IndexMap<String, PhaseShare>,
    pub object_statistics: Vec<ObjectStatistics>,
    pub key_frames: Vec<KeyFrame>,
    pub processed_frames: Vec<AnalyzedFrame>,
}

impl RunReport {
    pub fn build(
        source: String,
        backend: BackendKind,
        diagnostics: Vec<String>,
        frames: Vec<AnalyzedFrame>,
        key_frame_count: usize,
    ) -> Self {
        let key_frames = top_key_frames(&frames, key_frame_count)
            .into_iter()
            .enumerate()
            .map(|(rank, idx)| KeyFrame::from_frame(rank + 1, &frames[idx]))
            .collect();
        Self {
            source,
            generated_at: Utc::now(),
            segmentation_backend: backend,
            diagnostics,
            frames_analyzed: frames.len(),
            importance: importance_summary(&frames),
            phase_distribution: phase_distribution(&frames),
            object_statistics: object_statistics(&frames),
            key_frames,
            processed_frames: frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FrameSummary;

    fn frame(number: usize, phase: &str, score: f32, objects: &[(&str, f32)]) -> AnalyzedFrame {
        let timestamp_sec = number as f64 / 25.0;
        AnalyzedFrame {
            frame_number: number,
            source: format!("frame_{number:05}.png"),
            timestamp_sec,
            timestamp_str: format_timestamp(timestamp_sec),
            summary: FrameSummary::new(
                phase.to_string(),
                IndexMap::new(),
                objects
                    .iter()
                    .map(|(label, coverage)| DetectedObject {
                        label: label.to_string(),
                        coverage: *coverage,
                    })
                    .collect(),
                score,
                0.0,
                0.0,
            ),
        }
    }

    fn sample() -> Vec<AnalyzedFrame> {
        vec![
            frame(0, "exposure", 40.0, &[("liver", 0.5)]),
            frame(30, "critical_dissection", 80.0, &[("grasper", 0.2), ("liver", 0.3)]),
            frame(60, "critical_dissection", 80.0, &[("hook", 0.1)]),
            frame(90, "closure", 20.0, &[]),
        ]
    }

    #[test]
    fn timestamps_are_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00.00");
        assert_eq!(format_timestamp(5.5), "00:05.50");
        assert_eq!(format_timestamp(75.25), "01:15.25");
        assert_eq!(format_timestamp(3600.0), "60:00.00");
    }

    #[test]
    fn key_frames_ranked_with_stable_ties() {
        let frames = sample();
        assert_eq!(top_key_frames(&frames, 3), vec![1, 2, 0]);
        assert_eq!(top_key_frames(&frames, 10).len(), 4);
        assert!(top_key_frames(&[], 3).is_empty());
    }

    #[test]
    fn phase_distribution_most_common_first() {
        let dist = phase_distribution(&sample());
        let phases: Vec<&str> = dist.keys().map(String::as_str).collect();
        assert_eq!(phases[0], "critical_dissection");
        assert_eq!(dist["critical_dissection"].count, 2);
        assert!((dist["critical_dissection"].percentage - 50.0).abs() < 1e-4);
        assert_eq!(dist.len(), 3);
    }

    #[test]
    fn object_statistics_accumulate() {
        let stats = object_statistics(&sample());
        assert_eq!(stats[0].object, "liver");
        assert_eq!(stats[0].appearances, 2);
        assert!((stats[0].total_coverage - 0.8).abs() < 1e-6);
        assert!((stats[0].avg_coverage - 0.4).abs() < 1e-6);
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn importance_summary_tracks_peak() {
        let summary = importance_summary(&sample()).unwrap();
        assert_eq!(summary.max, 80.0);
        assert_eq!(summary.min, 20.0);
        assert_eq!(summary.peak_frame, 30);
        assert!((summary.mean - 55.0).abs() < 1e-4);
        assert!(importance_summary(&[]).is_none());
    }

    #[test]
    fn description_uses_record_fields() {
        let frames = sample();
        let text = fallback_description(&frames[1]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "00:01.20 view with grasper, liver");
        assert_eq!(lines[1], "Phase: Critical Dissection");
        assert_eq!(lines[2], "Importance score 80.0; review instrument positioning");
        assert!(fallback_description(&frames[3]).contains("key anatomical landmarks"));
    }

    #[test]
    fn report_serializes_with_key_frames() {
        let report = RunReport::build("frames".into(), BackendKind::Unet, Vec::new(), sample(), 2);
        assert_eq!(report.frames_analyzed, 4);
        assert_eq!(report.key_frames[0].rank, 1);
        assert_eq!(report.key_frames[0].frame_number, 30);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["segmentation_backend"], "unet");
        assert_eq!(json["processed_frames"][0]["phase"], "exposure");
        assert!(json["processed_frames"][0].get("segmentation_mask").is_none());
    }
}
