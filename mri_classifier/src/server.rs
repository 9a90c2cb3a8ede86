use crate::{
    config::{CorsConfig, ServerConfig, UploadConfig},
    error::ClassifierError,
    model_service::ModelService,
    routes::api_routes,
    state::SharedState,
};
use axum::{extract::DefaultBodyLimit, Router};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Allows the configured origins with any method, any header and credentials.
pub fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer, ClassifierError> {
    let origins = cors
        .header_values()
        .map_err(ClassifierError::Configuration)?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub fn build_router<M: ModelService>(
    state: SharedState<M>,
    cors: &CorsConfig,
    upload: &UploadConfig,
) -> Result<Router, ClassifierError> {
    let router = Router::new()
        .merge(api_routes::<M>())
        .with_state(state)
        .layer(DefaultBodyLimit::max(upload.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors)?);

    Ok(router)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(router: Router, config: &ServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.get_address()).await?;
        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                tracing::info!("HTTP server stopped");
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{PreprocessingConfig, TensorLayout},
        prediction::{ClassLabel, Prediction},
        preprocessing::{tests::encode_png, Preprocessor},
    };
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use ndarray::ArrayView4;
    use serde_json::Value;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        sync::broadcast,
    };
    use tower::ServiceExt;

    const ORIGIN: &str = "http://localhost:3000";
    const BOUNDARY: &str = "mri-classifier-test-boundary";

    struct FixedModelService {}

    impl ModelService for FixedModelService {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError> {
            Ok(Prediction::new(ClassLabel::Name("glioma".to_string()), 0.87234))
        }
    }

    /// Scores classes by mean input intensity so different images get different answers.
    struct IntensityModelService {
        labels: Vec<String>,
    }

    impl ModelService for IntensityModelService {
        fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError> {
            let mean = input.mean().unwrap_or(0.0);
            Prediction::from_scores(&[mean, 1.0 - mean], Some(self.labels.as_slice()), false)
        }
    }

    struct FailingModelService {}

    impl ModelService for FailingModelService {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError> {
            Err(ClassifierError::InferenceFailure(
                "CUDA out of memory at 0xdeadbeef".to_string(),
            ))
        }
    }

    #[derive(Default)]
    struct ReleasableModelService {
        released: AtomicBool,
    }

    impl ModelService for ReleasableModelService {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> Result<Prediction, ClassifierError> {
            if self.released.load(Ordering::SeqCst) {
                return Err(ClassifierError::ModelUnavailable(
                    "sessions have been released".to_string(),
                ));
            }
            Ok(Prediction::new(ClassLabel::Index(2), 0.5))
        }

        fn shutdown(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn router_with<M: ModelService>(model_service: Arc<M>, max_upload_bytes: usize) -> Router {
        let preprocessor = Preprocessor::new(PreprocessingConfig {
            width: 8,
            height: 8,
            layout: TensorLayout::Nchw,
            ..Default::default()
        });
        let cors = CorsConfig {
            allowed_origins: vec![ORIGIN.to_string()],
        };
        let upload = UploadConfig { max_upload_bytes };
        build_router(SharedState::new(model_service, preprocessor), &cors, &upload).unwrap()
    }

    fn router<M: ModelService>(model_service: M) -> Router {
        router_with(Arc::new(model_service), 1024 * 1024)
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                 filename=\"scan.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/detect")
            .header(header::ORIGIN, ORIGIN)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_detect_returns_rounded_prediction() {
        let response = router(FixedModelService {})
            .oneshot(multipart_request("file", &encode_png(20, 20, [40, 40, 40])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            ORIGIN
        );
        let body = json_body(response).await;
        assert_eq!(
            body,
            serde_json::json!({"predicted_class": "glioma", "confidence_score": 0.8723})
        );
    }

    #[tokio::test]
    async fn test_detect_valid_image_reports_known_label() {
        let labels = vec!["tumor".to_string(), "notumor".to_string()];
        let app = router(IntensityModelService {
            labels: labels.clone(),
        });

        let response = app
            .oneshot(multipart_request("file", &encode_png(16, 16, [230, 230, 230])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let class = body["predicted_class"].as_str().unwrap();
        let confidence = body["confidence_score"].as_f64().unwrap();
        assert_eq!(class, "tumor");
        assert!(labels.iter().any(|l| l == class));
        assert!((0.0..=1.0).contains(&confidence));
        let scaled = confidence * 10_000.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_detect_same_image_twice_is_identical() {
        let app = router(IntensityModelService {
            labels: vec!["tumor".to_string(), "notumor".to_string()],
        });
        let image = encode_png(30, 12, [10, 120, 250]);

        let first = app
            .clone()
            .oneshot(multipart_request("file", &image))
            .await
            .unwrap();
        let second = app.oneshot(multipart_request("file", &image)).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await, json_body(second).await);
    }

    #[tokio::test]
    async fn test_detect_rejects_non_image() {
        let response = router(FixedModelService {})
            .oneshot(multipart_request("file", b"%PDF-1.4 not really an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detect_requires_file_field() {
        let response = router(FixedModelService {})
            .oneshot(multipart_request("image", &encode_png(4, 4, [0, 0, 0])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("file"));
    }

    #[tokio::test]
    async fn test_detect_rejects_non_multipart_body_as_json() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/detect")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(encode_png(4, 4, [0, 0, 0])))
            .unwrap();

        let response = router(FixedModelService {}).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = json_body(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Upload rejected"));
    }

    #[tokio::test]
    async fn test_detect_rejects_oversized_upload() {
        let app = router_with(Arc::new(FixedModelService {}), 1024);
        let response = app
            .oneshot(multipart_request("file", &vec![7u8; 8 * 1024]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_inference_failure_hides_details() {
        let response = router(FailingModelService {})
            .oneshot(multipart_request("file", &encode_png(4, 4, [9, 9, 9])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        let error = body["error"].as_str().unwrap();
        assert_eq!(error, "Inference failed");
        assert!(!error.contains("deadbeef"));
    }

    #[tokio::test]
    async fn test_detect_after_shutdown_is_unavailable() {
        let model_service = Arc::new(ReleasableModelService::default());
        let app = router_with(model_service.clone(), 1024 * 1024);
        let image = encode_png(4, 4, [9, 9, 9]);

        let response = app
            .clone()
            .oneshot(multipart_request("file", &image))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        model_service.shutdown();

        let response = app.oneshot(multipart_request("file", &image)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/detect")
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(
                header::ACCESS_CONTROL_REQUEST_HEADERS,
                "content-type,x-requested-with",
            )
            .body(Body::empty())
            .unwrap();

        let response = router(FixedModelService {}).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "content-type,x-requested-with"
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_ignores_other_origins() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/detect")
            .header(header::ORIGIN, "http://evil.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = router(FixedModelService {}).oneshot(request).await.unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router(FixedModelService {}).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"status": "Available"})
        );
    }

    #[tokio::test]
    async fn test_http_server_serves_until_shutdown() -> anyhow::Result<()> {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = HttpServer::new(router(FixedModelService {}), &config).await?;
        let addr = server.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = server.run(shutdown_tx.subscribe()).await?;

        let mut stream = tokio::net::TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Available"));

        shutdown_tx.send(())?;
        handle.await??;

        Ok(())
    }
}
