use crate::{
    config::Config,
    model_service::ModelService,
    ort_service::OrtModelService,
    preprocessing::Preprocessor,
    server::{build_router, HttpServer},
    state::SharedState,
};
use std::{error::Error, future::Future, sync::Arc};
use tokio::{signal, sync::broadcast, task::JoinHandle};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return Err(Box::new(e));
        }
    };

    let preprocessor = Preprocessor::new(config.model.preprocessing.clone());
    tracing::info!(
        "Model input shape {:?}, allowed origins {:?}",
        preprocessor.input_shape(),
        config.cors.allowed_origins
    );

    let state = SharedState::new(model_service.clone(), preprocessor);
    let router = build_router(state, &config.cors, &config.upload)?;
    let server = HttpServer::new(router, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    wait_for_shutdown(
        server_handle,
        shutdown_tx,
        model_service.as_ref(),
        shutdown_signal(),
    )
    .await?;

    Ok(())
}

/// Waits for `shutdown` or for the server task to exit on its own, whichever
/// comes first, then drains the server and releases the model.
async fn wait_for_shutdown<M: ModelService>(
    mut server_handle: JoinHandle<anyhow::Result<()>>,
    shutdown_tx: broadcast::Sender<()>,
    model_service: &M,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let served = tokio::select! {
        served = &mut server_handle => {
            tracing::error!("HTTP server exited before a shutdown signal");
            served
        }
        _ = shutdown => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
            let _ = shutdown_tx.send(());
            server_handle.await
        }
    };

    model_service.shutdown();

    served?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
