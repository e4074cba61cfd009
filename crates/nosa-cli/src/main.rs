//! NOSA demo: simulated recordings through the full stage pipeline
//!
//! Usage: `nosa [--config preset.json] [--export export.json]`

use anyhow::{Context, Result};
use clap::Parser;
use nosa_core::{Region, RegionShape};
use nosa_processing::{PipelineConfig, StageKind, StageOutput, Workspace};
use nosa_simulation::{TraceConfig, TracePattern, TraceSimulator};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ObjectSummary {
    name: String,
    samples: usize,
    sampling_rate: Option<f64>,
    spikes: Option<usize>,
    spike_frequency: Option<f64>,
    bursts: Option<usize>,
    mean_burst_duration: Option<f64>,
    peak_frequency: Option<f64>,
}

#[derive(Debug, Serialize)]
struct PairSummary {
    stage: &'static str,
    first: String,
    second: String,
    delay: Option<f64>,
    coefficient: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Summary {
    objects: Vec<ObjectSummary>,
    correlations: Vec<PairSummary>,
}

/// Run simulated recordings through the NOSA stage pipeline
#[derive(Parser, Debug)]
#[command(name = "nosa", version, about)]
struct Cli {
    /// Pipeline preset (JSON) applied to the electrophysiology objects
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write every object's signals and stage outputs to this JSON file
    #[arg(short, long)]
    export: Option<PathBuf>,
}

fn ephys_config(name: &str, phase: f64, seed: u64) -> TraceConfig {
    TraceConfig {
        name: name.to_string(),
        sampling_rate: 500.0,
        patterns: vec![
            TracePattern::Spikes {
                interval: 0.5,
                phase,
                amplitude: 4.0,
                width: 0.006,
            },
            TracePattern::Bursts {
                interval: 2.5,
                phase: phase + 0.3,
                duration: 0.4,
                amplitude: 1.5,
                decay_tau: 0.1,
            },
            TracePattern::Oscillation {
                frequency: 2.0,
                amplitude: 0.2,
            },
        ],
        drift: 0.05,
        noise_std: 0.05,
        seed: Some(seed),
        ..TraceConfig::default()
    }
}

fn summarize(workspace: &Workspace) -> Summary {
    let objects = workspace
        .objects()
        .iter()
        .map(|object| {
            let output = |kind: StageKind| {
                object
                    .pipeline
                    .stage(kind)
                    .filter(|s| s.is_active())
                    .and_then(|s| s.output())
            };
            let spikes = output(StageKind::SpikeDetection).and_then(StageOutput::spikes);
            let bursts = output(StageKind::BurstDetection).and_then(StageOutput::bursts);
            let spectrum = match output(StageKind::PowerSpectrum) {
                Some(StageOutput::PowerSpectrum(Some(spectrum))) => Some(spectrum.max_power_frequency),
                _ => None,
            };
            ObjectSummary {
                name: object.name.clone(),
                samples: object.processed().map_or(0, <[f64]>::len),
                sampling_rate: object.processed_rate(),
                spikes: spikes.map(|s| s.times.len()),
                spike_frequency: spikes.map(|s| s.frequency),
                bursts: bursts.map(|b| b.starts.len()),
                mean_burst_duration: bursts.and_then(|b| b.mean_duration),
                peak_frequency: spectrum,
            }
        })
        .collect();

    let mut correlations = Vec::new();
    if let Some(object) = workspace.objects().first() {
        for kind in [StageKind::SpikeCorrelation, StageKind::AmplitudeCorrelation] {
            let result = workspace
                .stage(object.id, kind)
                .ok()
                .and_then(|s| s.output())
                .and_then(StageOutput::correlation);
            for pair in result.iter().flat_map(|r| &r.pairs) {
                correlations.push(PairSummary {
                    stage: kind.name(),
                    first: pair.first.clone(),
                    second: pair.second.clone(),
                    delay: pair.delay,
                    coefficient: pair.coefficient,
                });
            }
        }
    }
    Summary { objects, correlations }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let preset = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load preset {}", path.display()))?,
        None => PipelineConfig::electrophysiology(),
    };
    info!("Using preset '{}'", preset.name);

    let mut workspace = Workspace::new();

    // Two electrophysiology recordings, the second one lagging by 40 ms
    let mut first_sim = TraceSimulator::new(ephys_config("cell_a.abf", 0.2, 1))?;
    let mut second_sim = TraceSimulator::new(ephys_config("cell_b.abf", 0.24, 2))?;
    let first_source = workspace.add_source(first_sim.generate(10.0)?)?;
    let second_source = workspace.add_source(second_sim.generate(10.0)?)?;

    let first = workspace
        .add_object(first_source, None)
        .context("Failed to create first object")?;
    workspace
        .apply_config(first, &preset)
        .context("Failed to apply preset")?;
    workspace
        .set_stage_active(first, StageKind::PowerSpectrum, true)
        .context("Failed to enable power spectrum")?;
    workspace
        .set_stage_active(first, StageKind::SpikeCorrelation, true)
        .context("Failed to enable spike correlation")?;
    workspace
        .add_object(second_source, Some(first))
        .context("Failed to create second object")?;

    // One imaged cell with calcium transients
    let mut imaging = TraceSimulator::new(TraceConfig {
        seed: Some(3),
        ..TraceConfig::calcium_imaging()
    })?;
    let cell = Region::new((8.0, 8.0), (10.0, 10.0), 0.0, RegionShape::Ellipse);
    let (stack, recording) = imaging.generate_frames(20.0, 32, 32, &cell, 20.0)?;
    let image_source = workspace.add_image_source(recording, Box::new(stack))?;
    let roi = workspace.add_object(image_source, None)?;
    workspace.set_region(roi, cell)?;
    workspace.apply_config(roi, &PipelineConfig::calcium_imaging())?;

    let summary = summarize(&workspace);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );

    if let Some(path) = &args.export {
        let json = workspace.export_json()?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Exported {} objects to {}", workspace.objects().len(), path.display());
    }
    Ok(())
}
