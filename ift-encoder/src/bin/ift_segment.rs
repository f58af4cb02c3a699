//! Computes a glyph segmentation plan for a font.
//!
//! Runs the closure driven segmentation planner over a font and a segment
//! list, printing the resulting plan and its lowered patch map entries.

use std::process::ExitCode;

use clap::Parser;
use ift_encoder::{
    ClosureGlyphSegmenter, CodepointSet, MergeStrategy, Segment, SubsetDefinition,
};
use read_fonts::FontRef;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Computes an IFT glyph segmentation plan for a font from a list of codepoint segments."
)]
struct Args {
    /// The input font file.
    #[arg(short, long)]
    font: std::path::PathBuf,

    /// Segment list file: one segment per line. Each line is the text whose
    /// codepoints form the segment, optionally prefixed by a probability and
    /// a tab. Order segments by descending usage probability.
    #[arg(short, long)]
    segments: std::path::PathBuf,

    /// Text that the initial font should already cover.
    #[arg(short, long)]
    init_text: Option<String>,

    /// Merge strategy: none, heuristic, or cost.
    #[arg(long, default_value = "none")]
    strategy: String,

    /// Minimum desired patch size in bytes (heuristic strategy).
    #[arg(long, default_value_t = 0)]
    patch_size_min_bytes: u32,

    /// Maximum allowed merged patch size in bytes (heuristic strategy).
    #[arg(long, default_value_t = u32::MAX)]
    patch_size_max_bytes: u32,

    /// Fixed per request network cost in bytes (cost strategy).
    #[arg(long, default_value_t = 75)]
    network_overhead_bytes: u32,

    /// A segment can be left unmerged once it has this many codepoints (cost
    /// strategy).
    #[arg(long, default_value_t = 0)]
    minimum_group_size: u32,

    /// Fraction of total cost below which tail segments are not scored.
    #[arg(long, default_value_t = 0.0)]
    optimization_cutoff_fraction: f64,

    /// Cost delta ceiling for moving a patch into the initial font. Enables
    /// init font moves when set (cost strategy).
    #[arg(long)]
    init_font_merge_threshold: Option<f64>,

    /// Minimum segment probability to consider for an init font move.
    #[arg(long)]
    init_font_merge_probability_threshold: Option<f64>,

    /// Also consider combining patches when evaluating disjunctive
    /// conditions (cost strategy).
    #[arg(long, default_value_t = false)]
    use_patch_merges: bool,

    /// Brotli quality (1-11) used for patch size estimates.
    #[arg(long, default_value_t = 9)]
    estimate_compression_quality: u8,
}

fn parse_segments(contents: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for line in contents.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (probability, text) = match line.split_once('\t') {
            Some((prefix, rest)) => match prefix.trim().parse::<f64>() {
                Ok(p) => (p, rest),
                Err(_) => (1.0, line),
            },
            None => (1.0, line),
        };

        let codepoints: CodepointSet = text.chars().map(|c| c as u32).collect();
        segments.push(Segment::new(SubsetDefinition::codepoints(codepoints), probability));
    }
    segments
}

fn build_strategy(args: &Args) -> Result<MergeStrategy, String> {
    let mut strategy = match args.strategy.as_str() {
        "none" => MergeStrategy::none(),
        "heuristic" => {
            MergeStrategy::heuristic(args.patch_size_min_bytes, args.patch_size_max_bytes)
        }
        "cost" => MergeStrategy::cost_based(args.network_overhead_bytes)
            .with_minimum_group_size(args.minimum_group_size)
            .with_optimization_cutoff_fraction(args.optimization_cutoff_fraction)
            .with_patch_merges(args.use_patch_merges),
        other => return Err(format!("unknown merge strategy: {other}")),
    };

    if let Some(threshold) = args.init_font_merge_threshold {
        strategy = strategy.with_init_font_merge_threshold(threshold);
    }
    if let Some(threshold) = args.init_font_merge_probability_threshold {
        strategy = strategy.with_init_font_merge_probability_threshold(threshold);
    }
    Ok(strategy.with_estimate_compression_quality(args.estimate_compression_quality))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let strategy = match build_strategy(&args) {
        Ok(strategy) => strategy,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let font_bytes = match std::fs::read(&args.font) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("unable to read font file {}: {err}", args.font.display());
            return ExitCode::FAILURE;
        }
    };
    let font = match FontRef::new(&font_bytes) {
        Ok(font) => font,
        Err(err) => {
            eprintln!("font parsing failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let segment_contents = match std::fs::read_to_string(&args.segments) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!(
                "unable to read segments file {}: {err}",
                args.segments.display()
            );
            return ExitCode::FAILURE;
        }
    };
    let segments = parse_segments(&segment_contents);

    let mut initial_segment = SubsetDefinition::default();
    if let Some(text) = &args.init_text {
        initial_segment.codepoints = text.chars().map(|c| c as u32).collect();
    }

    let segmentation = match ClosureGlyphSegmenter.codepoint_to_glyph_segments(
        &font,
        initial_segment,
        segments,
        strategy,
    ) {
        Ok(segmentation) => segmentation,
        Err(err) => {
            eprintln!("segmentation failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    print!("{segmentation}");

    match segmentation.to_patch_map_entries() {
        Ok(entries) => {
            println!("{} patch map entries", entries.len());
        }
        Err(err) => {
            eprintln!("patch map lowering failed: {err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
