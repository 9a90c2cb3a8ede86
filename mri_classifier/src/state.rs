use crate::{model_service::ModelService, preprocessing::Preprocessor};
use std::sync::Arc;

pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub preprocessor: Arc<Preprocessor>,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(model_service: Arc<M>, preprocessor: Preprocessor) -> Self {
        Self {
            model_service,
            preprocessor: Arc::new(preprocessor),
        }
    }
}

// Derived `Clone` would require `M: Clone`.
impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            preprocessor: self.preprocessor.clone(),
        }
    }
}
