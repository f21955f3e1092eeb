use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use surgical_scene::onnx::ort_runtime_version;
use surgical_scene::preview::{blend_overlay, default_palette};
use surgical_scene::report::RunReport;
use surgical_scene::scan::{analyze_folder, reanalyze_frame, ScanOptions};
use surgical_scene::{Result, Settings, SurgicalSceneAnalyzer};

const OVERLAY_ALPHA: f32 = 0.5;

#[derive(Parser, Debug)]
#[command(name = "surgical-scene")]
#[command(version)]
#[command(about = "Segmentation, phase recognition and importance scoring for surgical video frames", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults are used when it does not exist
    #[arg(long, global = true, default_value = "surgical_scene.json")]
    settings: PathBuf,

    /// Override the artifacts directory holding the ONNX checkpoints
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a folder of extracted frames and write a JSON report
    Analyze {
        /// Folder containing frame images
        frames_dir: PathBuf,

        /// Analyze every Nth frame
        #[arg(long, default_value = "1")]
        frame_skip: usize,

        /// Stop after this many analyzed frames
        #[arg(long)]
        max_frames: Option<usize>,

        /// Frame rate the frames were extracted at
        #[arg(long, default_value = "25.0")]
        fps: f64,

        /// Image quality score (0-100) applied to every frame
        #[arg(long, default_value = "90.0")]
        quality: f32,

        /// Number of key frames to report
        #[arg(long, default_value = "6")]
        key_frames: usize,

        /// Write mask and overlay previews of the key frames here
        #[arg(long)]
        previews: Option<PathBuf>,

        /// Report output path
        #[arg(short, long, default_value = "frame_report.json")]
        output: PathBuf,
    },
    /// Print the active segmentation backend and the label taxonomy
    Labels,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(&cli.settings)?;
    if let Some(dir) = cli.artifacts {
        settings.analyzer.artifacts_dir = dir;
    }
    let analyzer = SurgicalSceneAnalyzer::new(settings.analyzer)?;

    match cli.command {
        Command::Labels => {
            println!("Segmentation backend: {}", analyzer.segmentation_backend());
            println!("Device: {}", analyzer.device());
            match ort_runtime_version() {
                Some(version) => println!("ONNX Runtime: {version}"),
                None => println!("ONNX Runtime: unavailable"),
            }
            for line in analyzer.diagnostics() {
                println!("warning: {line}");
            }
            for (idx, label) in analyzer.label_list().iter().enumerate() {
                println!("{idx:>3}  {label}");
            }
            Ok(())
        }
        Command::Analyze {
            frames_dir,
            frame_skip,
            max_frames,
            fps,
            quality,
            key_frames,
            previews,
            output,
        } => {
            let options = ScanOptions {
                frame_skip,
                max_frames,
                fps,
                quality_score: quality,
            };
            let frames = analyze_folder(&analyzer, &frames_dir, &options)?;
            let report = RunReport::build(
                frames_dir.to_string_lossy().to_string(),
                analyzer.segmentation_backend(),
                analyzer.diagnostics().to_vec(),
                frames,
                key_frames,
            );
            if let Some(dir) = previews {
                write_previews(&analyzer, &report, &dir, quality)?;
            }
            write_report(&report, &output)?;
            log::info!(
                "Wrote {} frames ({} key frames) to {}",
                report.frames_analyzed,
                report.key_frames.len(),
                output.display()
            );
            Ok(())
        }
    }
}

/// Masks are not kept across a run, so each key frame is analyzed again
/// from its source file.
fn write_previews(
    analyzer: &SurgicalSceneAnalyzer,
    report: &RunReport,
    dir: &Path,
    quality: f32,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let palette = default_palette();
    for key in &report.key_frames {
        let (img, record) = match reanalyze_frame(analyzer, Path::new(&key.source), quality) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Preview skipped for {}: {}", key.source, err);
                continue;
            }
        };
        let mask = record.segmentation_mask().view();
        let stem = format!("key_{:02}_frame_{:06}", key.rank, key.frame_number);
        analyzer.save_mask_preview(mask, &dir.join(format!("{stem}_mask.png")), &palette)?;
        let overlay = blend_overlay(&img, mask, &palette, OVERLAY_ALPHA)?;
        overlay.save(dir.join(format!("{stem}_overlay.png")))?;
    }
    Ok(())
}

fn write_report(report: &RunReport, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, serde_json::to_string_pretty(report)?)?;
    Ok(())
}
