//! reviewd - sequential kickboard report reviewer
//!
//! Reads report documents (JSON Lines), reviews each photo and persists one
//! conclusion per kickboard group:
//! 1. Skips reports without an image URL
//! 2. Loads the photo and the recorded model outputs for the report
//! 3. Runs the review pipeline (assignment, decision table, evidence crop)
//! 4. Prints a per-verdict summary at the end

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kickboard_review::{
    load_photo, read_reports, FilesystemEvidenceSink, GeoResolver, ReplayScript, ReportEvent,
    ReviewConfig, ReviewPipeline, SqliteConclusionStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Report documents, one JSON object per line.
    #[arg(long)]
    reports: PathBuf,
    /// Stop after this many reports.
    #[arg(long)]
    limit: Option<usize>,
    /// Recorded model outputs for reports that carry none.
    #[arg(long)]
    script: Option<PathBuf>,
    /// ONNX rider/pedestrian model; replaces recorded pose answers.
    #[cfg(feature = "backend-tract")]
    #[arg(long)]
    pose_model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = ReviewConfig::load()?;
    log::info!(
        "reviewd starting (db={}, evidence={}, padding={}, top_k={})",
        cfg.db_path,
        cfg.evidence.dir.display(),
        cfg.engine.crop_padding,
        cfg.engine.top_k
    );

    let fallback = match &args.script {
        Some(path) => Some(ReplayScript::from_path(path)?),
        None => None,
    };
    let evidence = FilesystemEvidenceSink::new(&cfg.evidence)?;
    let conclusions = SqliteConclusionStore::open(&cfg.db_path)?;
    let mut pipeline = ReviewPipeline::new(
        cfg.engine,
        ReplayScript::default().into_models(),
        evidence,
        conclusions,
    )
    .with_jpeg_quality(cfg.evidence.jpeg_quality);
    if let Some(geo) = geo_resolver(&cfg)? {
        log::info!("reverse geocoding via {}", geo.name());
        pipeline = pipeline.with_geo(geo);
    }

    #[cfg(feature = "backend-tract")]
    let fixed_pose = match &args.pose_model {
        Some(path) => {
            let classifier = kickboard_review::detect::backends::TractPoseClassifier::new(
                path, 224, 224,
            )?;
            pipeline.models_mut().pose = Box::new(classifier);
            log::info!("pose model loaded from {}", path.display());
            true
        }
        None => false,
    };
    #[cfg(not(feature = "backend-tract"))]
    let fixed_pose = false;

    let reports = read_reports(&args.reports)?;
    let base_dir = args
        .reports
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let limit = args.limit.unwrap_or(usize::MAX);
    log::info!("{} report(s) queued", reports.len().min(limit));

    let mut summary: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for report in reports.iter().take(limit) {
        let Some(image_url) = report.image_url.as_deref() else {
            log::info!("report {}: no image url, skipping", report.id);
            skipped += 1;
            continue;
        };
        let script = match report.replay.as_ref().or(fallback.as_ref()) {
            Some(script) => script.clone(),
            None => {
                log::error!("report {}: no recorded model outputs", report.id);
                failed += 1;
                continue;
            }
        };
        install_models(&mut pipeline, script, fixed_pose);

        match review_one(&mut pipeline, report, image_url, &base_dir) {
            Ok(outcome) => {
                for (_, verdict) in &outcome.verdicts {
                    *summary.entry(verdict.kind()).or_default() += 1;
                }
            }
            Err(err) => {
                log::error!("report {}: {:#}", report.id, err);
                failed += 1;
            }
        }
    }

    for (kind, count) in &summary {
        println!("{:<28} {}", kind, count);
    }
    println!("{:<28} {}", "skipped", skipped);
    println!("{:<28} {}", "failed", failed);
    println!(
        "{:<28} {}",
        "conclusions stored",
        pipeline.conclusions().count()?
    );
    Ok(())
}

fn install_models(
    pipeline: &mut ReviewPipeline<FilesystemEvidenceSink, SqliteConclusionStore>,
    script: ReplayScript,
    fixed_pose: bool,
) {
    let replayed = script.into_models();
    let models = pipeline.models_mut();
    models.detector = replayed.detector;
    models.brand = replayed.brand;
    models.helmet = replayed.helmet;
    if !fixed_pose {
        models.pose = replayed.pose;
    }
}

fn review_one(
    pipeline: &mut ReviewPipeline<FilesystemEvidenceSink, SqliteConclusionStore>,
    report: &ReportEvent,
    image_url: &str,
    base_dir: &Path,
) -> Result<kickboard_review::ReviewOutcome> {
    pipeline
        .models_mut()
        .warm_up()
        .context("model warm-up failed")?;
    let photo = load_photo(&resolve_local(image_url, base_dir))?;
    pipeline.process(report, &photo)
}

/// Relative photo paths are taken relative to the reports file.
fn resolve_local(image_url: &str, base_dir: &Path) -> String {
    if image_url.contains("://") || Path::new(image_url).is_absolute() {
        return image_url.to_string();
    }
    base_dir.join(image_url).to_string_lossy().into_owned()
}

#[cfg(feature = "geocode-vworld")]
fn geo_resolver(cfg: &ReviewConfig) -> Result<Option<Box<dyn GeoResolver>>> {
    Ok(cfg.vworld_api_key.as_ref().map(|key| {
        Box::new(kickboard_review::VworldGeoResolver::new(key.clone())) as Box<dyn GeoResolver>
    }))
}

#[cfg(not(feature = "geocode-vworld"))]
fn geo_resolver(cfg: &ReviewConfig) -> Result<Option<Box<dyn GeoResolver>>> {
    if cfg.vworld_api_key.is_some() {
        return Err(anyhow::anyhow!(
            "VWORLD_API_KEY is set but reviewd was built without geocode-vworld"
        ));
    }
    Ok(None)
}
