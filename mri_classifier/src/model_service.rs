use crate::{error::ClassifierError, prediction::Prediction};
use ndarray::ArrayView4;

/// A loaded classifier shared by every request.
///
/// `predict` takes `&self` and is called concurrently from the blocking pool,
/// so implementations must not mutate weights.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError>;

    /// Releases runtime resources. Later predictions fail with `ModelUnavailable`.
    fn shutdown(&self) {}
}
