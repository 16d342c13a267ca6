//! Inference Predictor Module
//!
//! Runs the full pipeline for one image or a batch:
//! preprocessing -> network -> softmax posterior -> label and confidence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::tensor::{activation::softmax, backend::Backend, Tensor};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint;
use crate::classes::{RoadClass, NUM_CLASSES};
use crate::inference::preprocess::{self, PreprocessConfig};
use crate::model::{ModelConfig, RoadAnomalyNet};
use crate::utils::error::{Result, RoadAnomalyError};
use crate::utils::round3;

/// Network output for one image, in class-index order
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPosterior {
    logits: Vec<f32>,
    probabilities: Vec<f32>,
}

impl ClassPosterior {
    /// Pair a row of logits with its softmax
    pub fn new(logits: Vec<f32>, probabilities: Vec<f32>) -> Result<Self> {
        if logits.len() != NUM_CLASSES || probabilities.len() != NUM_CLASSES {
            return Err(RoadAnomalyError::InferenceExecution(format!(
                "expected {} class scores, got {} logits and {} probabilities",
                NUM_CLASSES,
                logits.len(),
                probabilities.len()
            )));
        }
        if logits.iter().chain(&probabilities).any(|v| !v.is_finite()) {
            return Err(RoadAnomalyError::InferenceExecution(
                "network produced non-finite scores".to_string(),
            ));
        }
        Ok(Self {
            logits,
            probabilities,
        })
    }

    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    /// Highest-scoring class and its probability.
    ///
    /// Compared on logits, so classes whose probabilities collapse to the same
    /// f32 still resolve; exact ties go to the lowest index.
    pub fn argmax(&self) -> (RoadClass, f32) {
        let index = self
            .logits
            .iter()
            .enumerate()
            .fold((0, self.logits[0]), |(bi, bl), (i, &l)| {
                if l > bl {
                    (i, l)
                } else {
                    (bi, bl)
                }
            })
            .0;
        (RoadClass::ALL[index], self.probabilities[index])
    }

    pub fn probability(&self, class: RoadClass) -> f32 {
        self.probabilities[class.index()]
    }
}

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class index
    pub predicted_class: usize,

    /// Predicted class label
    pub predicted_label: RoadClass,

    /// Posterior of the predicted class, rounded to 3 decimals
    pub confidence: f64,

    /// Every class posterior, rounded to 3 decimals, in class order
    pub all_probabilities: BTreeMap<RoadClass, f64>,

    /// Wall-clock time of preprocessing plus forward pass
    #[serde(skip)]
    pub inference_time_ms: f64,
}

impl Prediction {
    pub fn from_posterior(posterior: &ClassPosterior, elapsed: Duration) -> Self {
        let (label, confidence) = posterior.argmax();

        let all_probabilities = RoadClass::ALL
            .iter()
            .map(|&class| (class, round3(posterior.probability(class))))
            .collect();

        Self {
            predicted_class: label.index(),
            predicted_label: label,
            confidence: round3(confidence),
            all_probabilities,
            inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.predicted_label, self.predicted_class
        ));
        output.push_str(&format!("Confidence: {:.1}%\n", self.confidence * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str("\nClass probabilities:\n");
        for (class, prob) in &self.all_probabilities {
            output.push_str(&format!("  {:<14} {:.3}\n", class.label(), prob));
        }

        output
    }
}

/// Predictor bound to a loaded network and a device.
///
/// `Send` but not `Sync`: give each worker thread its own clone. Clones share
/// the parameter tensors.
#[derive(Clone)]
pub struct Predictor<B: Backend> {
    model: RoadAnomalyNet<B>,
    preprocess: PreprocessConfig,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Wrap an already-populated network
    pub fn new(model: RoadAnomalyNet<B>, preprocess: PreprocessConfig, device: B::Device) -> Self {
        Self {
            model,
            preprocess,
            device,
        }
    }

    /// Load a checkpoint and build a ready predictor
    pub fn load(path: &Path, config: &ModelConfig, device: B::Device) -> Result<Self> {
        let model = checkpoint::load::<B>(path, config, &device)?;
        let preprocess = PreprocessConfig::default().with_image_size(config.image_size as u32);
        info!(
            "Predictor ready (input {}x{})",
            preprocess.image_size, preprocess.image_size
        );
        Ok(Self::new(model, preprocess, device))
    }

    pub fn model(&self) -> &RoadAnomalyNet<B> {
        &self.model
    }

    pub fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Classify a decoded image
    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let start = Instant::now();
        let input = preprocess::transform::<B>(image, &self.preprocess, &self.device)?;
        let posterior = self
            .posteriors(input.unsqueeze::<4>())?
            .into_iter()
            .next()
            .ok_or_else(|| RoadAnomalyError::InferenceExecution("empty output batch".to_string()))?;

        let prediction = Prediction::from_posterior(&posterior, start.elapsed());
        debug!(
            "Predicted {} ({:.3}) in {:.2} ms",
            prediction.predicted_label, prediction.confidence, prediction.inference_time_ms
        );
        Ok(prediction)
    }

    /// Classify an encoded image (PNG, JPEG, ...)
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = preprocess::decode_bytes(bytes)?;
        self.predict_image(&image)
    }

    /// Classify an image file
    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        let image = preprocess::open_path(path)?;
        self.predict_image(&image)
    }

    /// Classify an already-normalized batch `[N, 3, S, S]`
    pub fn predict_tensor(&self, input: Tensor<B, 4>) -> Result<Vec<Prediction>> {
        let start = Instant::now();
        let posteriors = self.posteriors(input)?;
        let elapsed = start.elapsed() / posteriors.len().max(1) as u32;

        Ok(posteriors
            .iter()
            .map(|posterior| Prediction::from_posterior(posterior, elapsed))
            .collect())
    }

    /// Classify several image files; failures are reported per file
    pub fn predict_batch(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<Prediction>)> {
        paths
            .iter()
            .map(|path| {
                let result = self.predict_file(path);
                if let Err(e) = &result {
                    warn!("Skipping {:?}: {}", path, e);
                }
                (path.clone(), result)
            })
            .collect()
    }

    fn posteriors(&self, input: Tensor<B, 4>) -> Result<Vec<ClassPosterior>> {
        let [batch_size, channels, height, width] = input.dims();
        let size = self.preprocess.image_size as usize;
        if batch_size == 0 || channels != 3 || height != size || width != size {
            return Err(RoadAnomalyError::InferenceExecution(format!(
                "input must have shape [N, 3, {size}, {size}], got [{batch_size}, {channels}, {height}, {width}]"
            )));
        }

        let logits = self.model.forward(input);
        let [_, num_logits] = logits.dims();
        if num_logits != NUM_CLASSES {
            return Err(RoadAnomalyError::InferenceExecution(format!(
                "network produced {} logits, expected {}",
                num_logits, NUM_CLASSES
            )));
        }

        let probabilities = read_rows(softmax(logits.clone(), 1))?;
        let logits = read_rows(logits)?;

        logits
            .chunks(NUM_CLASSES)
            .zip(probabilities.chunks(NUM_CLASSES))
            .map(|(l, p)| ClassPosterior::new(l.to_vec(), p.to_vec()))
            .collect()
    }
}

fn read_rows<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| {
            RoadAnomalyError::InferenceExecution(format!("Failed to read output: {:?}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    fn tiny_predictor(config: &ModelConfig) -> Predictor<TestBackend> {
        let device = Default::default();
        let model = RoadAnomalyNet::<TestBackend>::new(config, &device);
        let preprocess = PreprocessConfig::default().with_image_size(config.image_size as u32);
        Predictor::new(model, preprocess, device)
    }

    /// Posterior whose logits are the log of the given probabilities
    fn posterior(probabilities: Vec<f32>) -> ClassPosterior {
        let logits = probabilities.iter().map(|p| p.ln()).collect();
        ClassPosterior::new(logits, probabilities).unwrap()
    }

    #[test]
    fn test_argmax_ties_go_to_lowest_index() {
        let (label, confidence) = posterior(vec![0.1, 0.3, 0.1, 0.3, 0.2]).argmax();
        assert_eq!(label, RoadClass::Pothole);
        assert!((confidence - 0.3).abs() < 1e-6);

        assert_eq!(posterior(vec![0.2; 5]).argmax().0, RoadClass::DrainHole);
    }

    #[test]
    fn test_argmax_uses_logits_when_probabilities_collide() {
        let logits = vec![0.0, 1.0, 0.0, 1.000_000_2, 0.0];
        let probabilities = vec![0.1, 0.35, 0.1, 0.35, 0.1];
        let posterior = ClassPosterior::new(logits, probabilities).unwrap();

        let (label, confidence) = posterior.argmax();
        assert_eq!(label, RoadClass::UnpavedRoad);
        assert_eq!(confidence, 0.35);
    }

    #[test]
    fn test_posterior_rejects_wrong_width_and_nan() {
        assert!(ClassPosterior::new(vec![0.0, 0.0], vec![0.5, 0.5]).is_err());
        assert!(ClassPosterior::new(vec![0.0; 5], vec![f32::NAN, 0.0, 0.0, 0.0, 1.0]).is_err());
        assert!(ClassPosterior::new(vec![f32::NAN, 0.0, 0.0, 0.0, 0.0], vec![0.2; 5]).is_err());
    }

    #[test]
    fn test_prediction_rounding_and_order() {
        let posterior = posterior(vec![0.01234, 0.1, 0.6543, 0.2, 0.03336]);
        let prediction = Prediction::from_posterior(&posterior, Duration::from_millis(5));

        assert_eq!(prediction.predicted_class, 2);
        assert_eq!(prediction.predicted_label, RoadClass::SewerCover);
        assert_eq!(prediction.confidence, 0.654);
        assert_eq!(prediction.all_probabilities[&RoadClass::DrainHole], 0.012);
        assert_eq!(prediction.all_probabilities[&RoadClass::WetSurface], 0.033);

        let labels: Vec<_> = prediction.all_probabilities.keys().copied().collect();
        assert_eq!(labels, RoadClass::ALL.to_vec());
    }

    #[test]
    fn test_prediction_json_contract() {
        let prediction =
            Prediction::from_posterior(&posterior(vec![0.1, 0.6, 0.1, 0.1, 0.1]), Duration::from_millis(12));

        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["predicted_class"], 1);
        assert_eq!(json["predicted_label"], "Pothole");
        assert_eq!(json["confidence"], 0.6);
        assert_eq!(json["all_probabilities"]["Unpaved Road"], 0.1);
        assert!(json.get("inference_time_ms").is_none());

        let text = serde_json::to_string(&prediction).unwrap();
        let drain = text.find("Drain Hole").unwrap();
        let wet = text.find("Wet Surface").unwrap();
        assert!(drain < wet);
    }

    #[test]
    fn test_predict_image_distribution() {
        let predictor = tiny_predictor(&ModelConfig::tiny());
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(80, 50, Rgb([90, 90, 90])));

        let prediction = predictor.predict_image(&image).unwrap();
        let sum: f64 = prediction.all_probabilities.values().sum();
        assert!((sum - 1.0).abs() <= 1e-2);

        let max = prediction
            .all_probabilities
            .values()
            .cloned()
            .fold(f64::MIN, f64::max);
        assert_eq!(prediction.confidence, max);
    }

    #[test]
    fn test_clones_predict_concurrently() {
        let predictor = tiny_predictor(&ModelConfig::tiny());
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, 128])
        }));
        let expected = predictor.predict_image(&image).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let worker = predictor.clone();
                let image = image.clone();
                std::thread::spawn(move || worker.predict_image(&image).unwrap())
            })
            .collect();

        for handle in workers {
            let prediction = handle.join().unwrap();
            assert_eq!(prediction.predicted_label, expected.predicted_label);
            assert_eq!(prediction.all_probabilities, expected.all_probabilities);
        }
    }

    #[test]
    fn test_wrong_input_shape_is_inference_error() {
        let predictor = tiny_predictor(&ModelConfig::tiny());
        let input = Tensor::<TestBackend, 4>::zeros([1, 1, 64, 64], predictor.device());

        let err = predictor.predict_tensor(input).unwrap_err();
        assert!(matches!(err, RoadAnomalyError::InferenceExecution(_)));
    }

    #[test]
    fn test_wrong_class_count_is_inference_error() {
        let predictor = tiny_predictor(&ModelConfig::tiny().with_num_classes(4));
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], predictor.device());

        let err = predictor.predict_tensor(input).unwrap_err();
        assert!(matches!(err, RoadAnomalyError::InferenceExecution(_)));
    }

    #[test]
    fn test_predict_tensor_batch() {
        let predictor = tiny_predictor(&ModelConfig::tiny());
        let input = Tensor::<TestBackend, 4>::zeros([3, 3, 64, 64], predictor.device());

        let predictions = predictor.predict_tensor(input).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].all_probabilities, predictions[2].all_probabilities);
    }

    #[test]
    fn test_predict_batch_reports_failures_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("road.png");
        let bad = dir.path().join("broken.jpg");
        RgbImage::from_pixel(16, 16, Rgb([30, 60, 90])).save(&good).unwrap();
        std::fs::write(&bad, b"not a jpeg").unwrap();

        let predictor = tiny_predictor(&ModelConfig::tiny());
        let results = predictor.predict_batch(&[good.clone(), bad.clone()]);

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1,
            Err(RoadAnomalyError::InvalidImage(_))
        ));
    }
}
