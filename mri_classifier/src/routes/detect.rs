use crate::{
    error::ClassifierError, model_service::ModelService, prediction::DetectResponse,
    state::SharedState,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use tracing::instrument;

/// Multipart field carrying the uploaded image.
const IMAGE_FIELD: &str = "file";

#[instrument(skip(state, multipart))]
pub async fn detect<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, ClassifierError> {
    let image_data = read_image_field(multipart?).await?;
    tracing::debug!("Received upload of {} bytes", image_data.len());

    let prediction = tokio::task::spawn_blocking(move || {
        let input = state.preprocessor.preprocess(&image_data)?;
        state.model_service.predict(input.view())
    })
    .await
    .map_err(|e| ClassifierError::InferenceFailure(format!("inference task failed: {}", e)))??;

    tracing::info!(
        class = ?prediction.class,
        confidence = prediction.confidence,
        "Prediction complete"
    );

    Ok(Json(DetectResponse::from(prediction)))
}

async fn read_image_field(mut multipart: Multipart) -> Result<Bytes, ClassifierError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }

    Err(ClassifierError::MissingFile)
}
