use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};

/// A class is reported by name when labels are configured, otherwise by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassLabel {
    Name(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: ClassLabel,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(class: ClassLabel, confidence: f32) -> Self {
        Self { class, confidence }
    }

    /// Picks the highest scoring class from one row of model output.
    pub fn from_scores(
        scores: &[f32],
        labels: Option<&[String]>,
        apply_softmax: bool,
    ) -> Result<Self, ClassifierError> {
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ClassifierError::InferenceFailure(
                "model produced a non-finite score".to_string(),
            ));
        }

        let probabilities = if apply_softmax {
            softmax(scores)
        } else {
            scores.to_vec()
        };

        let (class_id, prob) = top_class(&probabilities).ok_or_else(|| {
            ClassifierError::InferenceFailure("model produced an empty output".to_string())
        })?;

        let class = match labels {
            Some(labels) if labels.len() != probabilities.len() => {
                return Err(ClassifierError::InferenceFailure(format!(
                    "model produced {} scores but {} labels are configured",
                    probabilities.len(),
                    labels.len()
                )))
            }
            Some(labels) => ClassLabel::Name(labels[class_id].clone()),
            None => ClassLabel::Index(class_id),
        };

        // Raw model outputs are not guaranteed to be probabilities.
        Ok(Self::new(class, prob.clamp(0.0, 1.0)))
    }
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the highest score. Ties keep the first index.
pub fn top_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
}

pub fn round_confidence(confidence: f32) -> f64 {
    (f64::from(confidence) * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub predicted_class: ClassLabel,
    pub confidence_score: f64,
}

impl From<Prediction> for DetectResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            predicted_class: prediction.class,
            confidence_score: round_confidence(prediction.confidence),
        }
    }
}
