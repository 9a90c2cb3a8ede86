mod detect;
mod health;

use crate::{model_service::ModelService, state::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub use detect::detect;
pub use health::healthcheck;

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/detect", post(detect::<M>))
}
