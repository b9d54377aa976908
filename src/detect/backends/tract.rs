#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::decision::PoseClass;
use crate::detect::backend::PoseClassifier;
use crate::frame::Photo;

const DEFAULT_RIDER_THRESHOLD: f32 = 0.5;

/// Rider/pedestrian classifier running a local ONNX model through tract.
///
/// Input is a `1x3xHxW` RGB tensor scaled to `0..1`; person crops are resized
/// to fit. Output is either a single rider logit or a `[pedestrian, rider]`
/// pair of logits.
pub struct TractPoseClassifier {
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    rider_threshold: f32,
}

impl TractPoseClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        if input_width == 0 || input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        let model_path = model_path.as_ref();
        let shape = tvec!(1, 3, input_height as usize, input_width as usize);
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load pose model {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("pose model rejected input shape")?
            .into_optimized()
            .context("failed to optimize pose model")?
            .into_runnable()
            .context("failed to plan pose model")?;

        Ok(Self {
            plan,
            input_width,
            input_height,
            rider_threshold: DEFAULT_RIDER_THRESHOLD,
        })
    }

    /// Rider probability at or above which a person counts as riding.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.rider_threshold = threshold;
        self
    }

    fn tensor_for(&self, person: &Photo) -> Result<Tensor> {
        if person.width() == 0 || person.height() == 0 {
            return Err(anyhow!("person crop is empty"));
        }
        let resized = imageops::resize(
            person.as_rgb(),
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let planar = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, c, y, x)| f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0,
        );
        Ok(planar.into_tensor())
    }
}

/// Maps raw model logits to a pose.
fn pose_from_logits(logits: &[f32], threshold: f32) -> PoseClass {
    let rider = match logits {
        [rider] => sigmoid(*rider),
        [pedestrian, rider] => {
            let peak = pedestrian.max(*rider);
            let (p, r) = ((pedestrian - peak).exp(), (rider - peak).exp());
            r / (p + r)
        }
        _ => return PoseClass::Unknown,
    };
    if !rider.is_finite() {
        PoseClass::Unknown
    } else if rider >= threshold {
        PoseClass::Rider
    } else {
        PoseClass::Pedestrian
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl PoseClassifier for TractPoseClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify_pose(&mut self, person: &Photo) -> Result<PoseClass> {
        let input = self.tensor_for(person)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("pose inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("pose model produced no outputs"))?;
        let logits: Vec<f32> = output
            .to_array_view::<f32>()
            .context("pose model output was not f32")?
            .iter()
            .copied()
            .collect();
        Ok(pose_from_logits(&logits, self.rider_threshold))
    }
}
