use crate::{
    config::{ModelConfig, Validatable},
    error::ClassifierError,
    labels::load_labels,
    model_service::ModelService,
    prediction::Prediction,
};
use ndarray::{ArrayView4, Dimension};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime backed classifier with a small round-robin pool of sessions.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Mutex<Option<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
    labels: Option<Arc<Vec<String>>>,
    apply_softmax: bool,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ClassifierError> {
        model_config
            .validate()
            .map_err(ClassifierError::Configuration)?;

        let labels = match model_config.get_labels_path() {
            Some(path) => {
                let labels = load_labels(&path).map_err(|e| {
                    ClassifierError::Configuration(format!("{:?}: {}", path, e))
                })?;
                tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
                Some(Arc::new(labels))
            }
            None => None,
        };

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(session)
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| {
                ClassifierError::ModelUnavailable(format!("failed to load model: {}", e))
            })?;

        let output_name = sessions
            .first()
            .and_then(|session| session.outputs.first())
            .map(|output| output.name.clone())
            .ok_or_else(|| {
                ClassifierError::ModelUnavailable("model declares no outputs".to_string())
            })?;

        tracing::info!(
            "Created {} ONNX sessions for {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions.into_iter().map(|s| Mutex::new(Some(s))).collect()),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            labels,
            apply_softmax: model_config.apply_softmax,
        })
    }

    /// Runs the model and returns the flattened scores of the single batch row.
    pub fn run_inference(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut guard = self.sessions[index].lock().map_err(|e| {
            ClassifierError::InferenceFailure(format!("session mutex poisoned: {}", e))
        })?;
        let session = guard.as_mut().ok_or_else(|| {
            ClassifierError::ModelUnavailable("sessions have been released".to_string())
        })?;

        tracing::debug!("Handling request with session {}", index);
        let input = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input.view()).map_err(|e| {
            ClassifierError::InferenceFailure(format!("failed to build tensor: {}", e))
        })?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifierError::InferenceFailure(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                ClassifierError::InferenceFailure(format!("failed to extract tensor: {}", e))
            })?;

        let dims = shape.to_ixdyn();
        if dims.ndim() > 0 && dims[0] > 1 {
            return Err(ClassifierError::InferenceFailure(format!(
                "expected a single batch row, got shape {:?}",
                dims
            )));
        }

        Ok(data.to_vec())
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError> {
        let scores = self.run_inference(input)?;
        let labels = self.labels.as_deref().map(Vec::as_slice);
        Prediction::from_scores(&scores, labels, self.apply_softmax)
    }

    fn shutdown(&self) {
        let mut released = 0;
        for session in self.sessions.iter() {
            let mut guard = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.take().is_some() {
                released += 1;
            }
        }
        tracing::info!("Released {} ONNX sessions", released);
    }
}
