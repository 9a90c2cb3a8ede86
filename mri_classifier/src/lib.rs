mod labels;
mod ort_service;
mod routes;
mod state;

pub mod app;
pub mod config;
pub mod error;
pub mod model_service;
pub mod prediction;
pub mod preprocessing;
pub mod server;

pub use app::start_app;
pub use model_service::ModelService;
pub use state::SharedState;
