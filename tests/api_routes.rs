//! End-to-end tests of the HTTP routes
//!
//! The router runs in-process through `tower::ServiceExt::oneshot`. Uploads go
//! through the real decode, mask and PNG encode path; only the model is
//! replaced by a deterministic backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bg_remover_api::{
    api,
    config::{RemovalConfig, ServerConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
    processor::BackgroundRemovalProcessor,
    remover::{BackgroundRemover, ModelBackgroundRemover},
};
use image::{DynamicImage, ImageBuffer, Rgb};
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "X-BG-REMOVER-TEST-BOUNDARY";
const MODEL_SIZE: usize = 32;

/// Marks a centred square covering the middle half of the model input as foreground
struct CenterSquareBackend {
    initialized: bool,
}

impl InferenceBackend for CenterSquareBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        let first = !self.initialized;
        self.initialized = true;
        Ok(first.then(|| Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if input.dim() != self.input_shape() {
            return Err(BgRemovalError::inference("unexpected input shape"));
        }
        let low = MODEL_SIZE / 4;
        let high = MODEL_SIZE - low;
        Ok(Array4::from_shape_fn(
            (1, 1, MODEL_SIZE, MODEL_SIZE),
            |(_, _, y, x)| {
                if (low..high).contains(&y) && (low..high).contains(&x) {
                    1.0
                } else {
                    0.0
                }
            },
        ))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, MODEL_SIZE, MODEL_SIZE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, MODEL_SIZE, MODEL_SIZE)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [MODEL_SIZE as u32, MODEL_SIZE as u32],
            ..PreprocessingConfig::default()
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "center-square".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 0,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Remover that only counts how often it was asked to work
#[derive(Default)]
struct CountingRemover {
    calls: AtomicUsize,
}

#[async_trait]
impl BackgroundRemover for CountingRemover {
    async fn remove_background(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(image_bytes)
    }
}

fn model_remover() -> Arc<dyn BackgroundRemover> {
    let processor = BackgroundRemovalProcessor::with_backend(
        RemovalConfig::default(),
        Box::new(CenterSquareBackend { initialized: false }),
    )
    .unwrap();
    Arc::new(ModelBackgroundRemover::new(processor))
}

fn app(remover: Arc<dyn BackgroundRemover>) -> Router {
    api::router(remover, &ServerConfig::default()).unwrap()
}

fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)));
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/remove-background")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_root_reports_running() {
    let remover = Arc::new(CountingRemover::default());
    let response = app(remover.clone())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "message": "Background Removal API is running" })
    );
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let remover = Arc::new(CountingRemover::default());
    let response = app(remover.clone())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "status": "healthy" })
    );
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_png_upload_returns_transparent_png_attachment() {
    let body = multipart_body("file", "red.png", "image/png", &png(10, 10, [255, 0, 0]));
    let response = app(model_remover())
        .oneshot(upload_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=no_bg_image.png"
    );

    let output = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .to_rgba8();
    assert_eq!(output.dimensions(), (10, 10));

    let center = output.get_pixel(5, 5).0;
    assert_eq!(center, [255, 0, 0, 255]);
    let corner = output.get_pixel(0, 0).0;
    assert_eq!(corner, [0, 0, 0, 0]);
}

#[tokio::test]
async fn test_jpeg_upload_is_accepted() {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(24, 16, Rgb([0, 128, 255])));
    let mut jpeg = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .unwrap();

    let body = multipart_body("file", "photo.jpg", "image/jpeg", &jpeg);
    let response = app(model_remover())
        .oneshot(upload_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let output = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((output.width(), output.height()), (24, 16));
}

#[tokio::test]
async fn test_non_image_upload_is_rejected_before_processing() {
    let remover = Arc::new(CountingRemover::default());
    let body = multipart_body("file", "notes.txt", "text/plain", b"hello");
    let response = app(remover.clone())
        .oneshot(upload_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "detail": "File must be an image" })
    );
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_file_field_is_rejected() {
    let remover = Arc::new(CountingRemover::default());
    let body = multipart_body("avatar", "red.png", "image/png", &png(2, 2, [1, 2, 3]));
    let response = app(remover.clone())
        .oneshot(upload_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("'file'"));
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_multipart_request_is_rejected() {
    let request = Request::post("/remove-background")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app(Arc::new(CountingRemover::default()))
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_undecodable_image_is_a_processing_error() {
    let garbage: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
    let body = multipart_body("file", "broken.png", "image/png", &garbage);
    let response = app(model_remover())
        .oneshot(upload_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(
        detail.starts_with("Error processing image: Failed to decode image: "),
        "{detail}"
    );
    assert!(!detail.contains("Processing error:"), "{detail}");
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let config = ServerConfig::builder().max_upload_bytes(1024).build().unwrap();
    let remover = Arc::new(CountingRemover::default());
    let app = api::router(remover.clone(), &config).unwrap();

    let body = multipart_body("file", "big.png", "image/png", &vec![0u8; 8 * 1024]);
    let response = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Error processing image: "), "{detail}");
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_get_their_own_results() {
    let app = app(model_remover());
    let sizes = [(10, 10), (20, 8), (7, 13), (16, 16), (5, 30)];

    let handles: Vec<_> = sizes
        .iter()
        .map(|&(width, height)| {
            let app = app.clone();
            tokio::spawn(async move {
                let body = multipart_body(
                    "file",
                    "upload.png",
                    "image/png",
                    &png(width, height, [0, 255, 0]),
                );
                let response = app.oneshot(upload_request(body)).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                let output = image::load_from_memory(&body_bytes(response).await).unwrap();
                (output.width(), output.height())
            })
        })
        .collect();

    for (handle, expected) in handles.into_iter().zip(sizes) {
        assert_eq!(handle.await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_cors_allows_configured_origin_with_credentials() {
    let request = Request::get("/health")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app(model_remover()).oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn test_cors_ignores_other_origins() {
    let request = Request::get("/health")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app(model_remover()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn test_cors_preflight_mirrors_method_and_headers() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/remove-background")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-custom-header")
        .body(Body::empty())
        .unwrap();
    let response = app(model_remover()).oneshot(request).await.unwrap();

    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "POST"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "x-custom-header"
    );
}
