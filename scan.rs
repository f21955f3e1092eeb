use crate::analyzer::SurgicalSceneAnalyzer;
use crate::error::{Error, Result};
use crate::models::{AnalyzedFrame, FrameRecord};
use crate::report::format_timestamp;
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUPPORTED_EXT: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Analyze every `frame_skip`-th frame.
    pub frame_skip: usize,
    pub max_frames: Option<usize>,
    pub fps: f64,
    pub quality_score: f32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            max_frames: None,
            fps: 25.0,
            quality_score: 90.0,
        }
    }
}

impl ScanOptions {
    fn validate(&self) -> Result<()> {
        if self.frame_skip == 0 {
            return Err(Error::Config("frame_skip must be at least 1".into()));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::Config(format!("fps must be positive, got {}", self.fps)));
        }
        Ok(())
    }
}

pub fn is_supported_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXT.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files under `root` in file-name order. The position in this list is
/// the frame number.
pub fn discover_frames(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_supported_frame(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Applies frame skipping and the frame cap; yields `(frame_number, path)`.
pub fn select_frames(frames: Vec<PathBuf>, options: &ScanOptions) -> Vec<(usize, PathBuf)> {
    let step = options.frame_skip.max(1);
    let selected = frames.into_iter().enumerate().step_by(step);
    match options.max_frames {
        Some(limit) => selected.take(limit).collect(),
        None => selected.collect(),
    }
}

/// Analyzes the selected frames of a folder in order. Files that cannot be
/// decoded are logged and skipped.
pub fn analyze_folder(
    analyzer: &SurgicalSceneAnalyzer,
    root: &Path,
    options: &ScanOptions,
) -> Result<Vec<AnalyzedFrame>> {
    options.validate()?;
    if !root.is_dir() {
        return Err(Error::Config(format!("{} is not a directory", root.display())));
    }
    let selected = select_frames(discover_frames(root), options);
    let total = selected.len();
    log::info!("Analyzing {} frames from {}", total, root.display());

    let mut results = Vec::with_capacity(total);
    for (idx, (frame_number, path)) in selected.iter().enumerate() {
        log::debug!("[{}/{}] {}", idx + 1, total, path.display());
        match process_frame(analyzer, *frame_number, path, options) {
            Ok(frame) => results.push(frame),
            Err(Error::Image(err)) => {
                log::warn!("Skipping {}: {}", path.display(), err);
            }
            Err(err) => return Err(err),
        }
    }
    log::info!("Analyzed {} of {} frames", results.len(), total);
    Ok(results)
}

fn process_frame(
    analyzer: &SurgicalSceneAnalyzer,
    frame_number: usize,
    path: &Path,
    options: &ScanOptions,
) -> Result<AnalyzedFrame> {
    let (_, record) = reanalyze_frame(analyzer, path, options.quality_score)?;
    // only the summary outlives the frame; masks are rebuilt on demand
    let (summary, _mask) = record.into_parts();
    let timestamp_sec = frame_number as f64 / options.fps;
    Ok(AnalyzedFrame {
        frame_number,
        source: path.to_string_lossy().to_string(),
        timestamp_sec,
        timestamp_str: format_timestamp(timestamp_sec),
        summary,
    })
}

/// Decodes and analyzes one frame file, returning the image alongside the
/// full record. Analysis is deterministic, so this reproduces the mask of a
/// frame seen earlier in a run.
pub fn reanalyze_frame(
    analyzer: &SurgicalSceneAnalyzer,
    path: &Path,
    quality_score: f32,
) -> Result<(RgbImage, FrameRecord)> {
    let img = image::open(path)?.to_rgb8();
    let record = analyzer.analyze_image(&img, quality_score)?;
    Ok((img, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SegmentationBackend;
    use crate::config::AnalyzerConfig;
    use crate::inference::UntrainedHead;
    use image::{Rgb, RgbImage};

    fn frames_dir(name: &str, count: usize) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let img = RgbImage::from_pixel(6, 4, Rgb([i as u8 * 10, 50, 90]));
            img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), b"not a frame").unwrap();
        dir
    }

    fn untrained_analyzer() -> SurgicalSceneAnalyzer {
        let config = AnalyzerConfig {
            image_size: 8,
            ..AnalyzerConfig::default()
        };
        SurgicalSceneAnalyzer::from_models(
            config,
            SegmentationBackend::Unet(Box::new(UntrainedHead::segmentation("unet", 9))),
            Box::new(UntrainedHead::classifier("phase", 6)),
        )
        .unwrap()
    }

    #[test]
    fn discovers_sorted_images_only() {
        let dir = frames_dir("ss_scan_discover", 3);
        let frames = discover_frames(&dir);
        let names: Vec<String> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["frame_000.png", "frame_001.png", "frame_002.png"]);
    }

    #[test]
    fn skip_and_cap_apply_in_order() {
        let frames: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("{i}.png"))).collect();
        let options = ScanOptions {
            frame_skip: 3,
            max_frames: Some(3),
            ..ScanOptions::default()
        };
        let numbers: Vec<usize> = select_frames(frames, &options)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(numbers, [0, 3, 6]);
    }

    #[test]
    fn folder_analysis_assigns_timestamps() {
        let dir = frames_dir("ss_scan_analyze", 4);
        std::fs::write(dir.join("frame_004.png"), b"truncated").unwrap();
        let options = ScanOptions {
            frame_skip: 2,
            fps: 2.0,
            ..ScanOptions::default()
        };
        let frames = analyze_folder(&untrained_analyzer(), &dir, &options).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].frame_number, 2);
        assert!((frames[1].timestamp_sec - 1.0).abs() < 1e-9);
        assert_eq!(frames[1].timestamp_str, "00:01.00");
        assert!(frames[0].summary.detected_objects().is_empty());
    }

    #[test]
    fn masks_rebuilt_from_source_match_summary() {
        let dir = frames_dir("ss_scan_reanalyze", 2);
        let analyzer = untrained_analyzer();
        let options = ScanOptions::default();
        let frames = analyze_folder(&analyzer, &dir, &options).unwrap();

        let json = serde_json::to_value(&frames[1]).unwrap();
        assert!(json.get("segmentation_mask").is_none());

        let (img, record) =
            reanalyze_frame(&analyzer, Path::new(&frames[1].source), options.quality_score).unwrap();
        assert_eq!(img.dimensions(), (6, 4));
        assert_eq!(record.segmentation_mask().dim(), (4, 6));
        assert_eq!(record.summary(), &frames[1].summary);
    }

    #[test]
    fn invalid_options_rejected() {
        let dir = frames_dir("ss_scan_invalid", 1);
        let options = ScanOptions {
            frame_skip: 0,
            ..ScanOptions::default()
        };
        assert!(analyze_folder(&untrained_analyzer(), &dir, &options).is_err());
        assert!(analyze_folder(&untrained_analyzer(), &dir.join("missing"), &ScanOptions::default()).is_err());
    }
}
