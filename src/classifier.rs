use std::path::Path;

use tract_onnx::prelude::*;

use crate::errors::ServerError;
use crate::image_input::{ImageBatch, INPUT_SIZE};

/// Class names in the order the network was trained with. The position of each
/// entry must match the model's output vector index.
pub const CLASS_NAMES: [&str; 4] = ["ALL-Infected", "Beginning", "Healthy", "Pre-leukemia"];

type RunnableOnnx = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// A loaded classifier network. Safe for concurrent read-only use.
pub struct Classifier {
    plan: RunnableOnnx,
}

impl Classifier {
    /// Deserializes the ONNX artifact at `path` into a runnable plan.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| {
                m.with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3),
                    ),
                )
            })
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
        Ok(Self { plan })
    }

    /// Runs forward inference on one preprocessed batch and returns the raw
    /// score vector.
    pub fn scores(&self, batch: ImageBatch) -> Result<Vec<f32>, ServerError> {
        let tensor: Tensor = batch.into();
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
        Ok(view.iter().copied().collect())
    }
}

#[derive(Debug)]
pub struct Prediction {
    pub label: &'static str,
    pub confidence: f32,
}

impl Prediction {
    /// Argmax over the score vector, ties broken by the lowest index. The
    /// confidence is the raw maximum, not re-normalized.
    pub fn from_scores(scores: &[f32]) -> Result<Self, ServerError> {
        if scores.len() != CLASS_NAMES.len() {
            return Err(ServerError::ModelLoad(format!(
                "model produced {} outputs, expected {}",
                scores.len(),
                CLASS_NAMES.len()
            )));
        }

        let mut best = 0;
        for (index, &score) in scores.iter().enumerate() {
            if score > scores[best] {
                best = index;
            }
        }

        Ok(Self {
            label: CLASS_NAMES[best],
            confidence: scores[best],
        })
    }

    pub fn display(&self) -> String {
        format!("{} ({:.2}%)", self.label, self.confidence * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Prediction, CLASS_NAMES};
    use crate::errors::ServerError;

    #[test]
    fn picks_the_maximum_score() {
        let prediction = Prediction::from_scores(&[0.01, 0.02, 0.9342, 0.03]).unwrap();
        assert_eq!(prediction.label, "Healthy");
        assert_eq!(prediction.display(), "Healthy (93.42%)");
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let prediction = Prediction::from_scores(&[0.5, 0.5, 0.0, 0.0]).unwrap();
        assert_eq!(prediction.label, "ALL-Infected");
        assert_eq!(prediction.confidence, 0.5);
        assert_eq!(prediction.display(), "ALL-Infected (50.00%)");
    }

    #[test]
    fn label_always_comes_from_the_class_list() {
        for scores in [
            [1.0, 0.0, 0.0, 0.0],
            [0.2, 0.3, 0.1, 0.4],
            [0.0, 0.0, 0.0, 0.0],
        ] {
            let prediction = Prediction::from_scores(&scores).unwrap();
            assert!(CLASS_NAMES.contains(&prediction.label));
            assert!((0.0..=1.0).contains(&prediction.confidence));
        }
    }

    #[test]
    fn wrong_output_width_is_rejected() {
        let err = Prediction::from_scores(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, ServerError::ModelLoad(_)));
    }
}
