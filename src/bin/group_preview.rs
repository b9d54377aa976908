//! group_preview - writes one annotated crop per kickboard group
//!
//! Runs detection, assignment and cropping only; no classifier is called.
//! Kickboards are outlined in blue and their people in green.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use kickboard_review::pipeline::annotate_group;
use kickboard_review::{
    assign_people, form_groups, EngineSettings, Photo, ReplayScript,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Photo to group.
    #[arg(long)]
    image: PathBuf,
    /// Recorded detector output for the photo.
    #[arg(long)]
    script: PathBuf,
    /// Output directory; crops are written as `_<n>.jpg`.
    #[arg(long, default_value = "output")]
    out: PathBuf,
    /// Pixels added around each group before cropping.
    #[arg(long, default_value_t = 200)]
    padding: u32,
    /// People kept per kickboard.
    #[arg(long, default_value_t = 3)]
    top_k: usize,
    /// JPEG quality of the written crops.
    #[arg(long, default_value_t = 90)]
    quality: u8,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.top_k == 0 {
        return Err(anyhow!("--top-k must be at least 1"));
    }

    let settings = EngineSettings {
        crop_padding: args.padding,
        top_k: args.top_k,
    };
    let photo = Photo::open(&args.image)?;
    let mut models = ReplayScript::from_path(&args.script)?.into_models();
    let kickboards = models.detector.detect_kickboards(&photo)?;
    let people = models.detector.detect_people(&photo)?;
    if kickboards.is_empty() || people.is_empty() {
        log::warn!(
            "nothing to group: {} kickboard(s), {} person(s)",
            kickboards.len(),
            people.len()
        );
        return Ok(());
    }

    let assignments = assign_people(&kickboards, &people);
    let groups = form_groups(&kickboards, &people, &assignments, settings.top_k);
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let mut written = 0usize;
    for group in &groups {
        let region = match settings.group_crop(group, &photo) {
            Ok(region) => region,
            Err(err) => {
                log::warn!("kickboard {}: {}", group.kickboard, err);
                continue;
            }
        };
        let crop = photo.crop(&region)?;
        let annotated = annotate_group(&crop, &region, group, None);
        let path = args.out.join(format!("_{}.jpg", written));
        std::fs::write(&path, annotated.encode_jpeg(args.quality)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!(
            "kickboard {} with {} person(s) -> {}",
            group.kickboard,
            group.members.len(),
            path.display()
        );
        written += 1;
    }
    println!("{} group crop(s) written to {}", written, args.out.display());
    Ok(())
}
