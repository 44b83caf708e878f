use std::io::ErrorKind;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use tracing::{error, info, warn};

use crate::error::DetectError;
use crate::labels::{ClassNames, parse_labels};
use crate::layout::{PredictionLayout, is_valid_image_name};
use crate::model::{DetectionJob, DetectionModel};
use crate::records::ResultStore;
use crate::storage::ObjectStore;
use crate::types::{HealthResponse, ImagePaths, PredictRequest, PredictionRecord, PredictionResponse};


/// Random 128-bit id; the only thing keeping concurrent requests apart.
pub fn new_prediction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}


/// Turns a stored image into labels, an annotated image and a stored record.
pub struct Detector {
    storage: Arc<dyn ObjectStore>,
    model: Arc<dyn DetectionModel>,
    records: Arc<dyn ResultStore>,
    classes: Arc<ClassNames>,
    layout: PredictionLayout,
}

impl Detector {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        model: Arc<dyn DetectionModel>,
        records: Arc<dyn ResultStore>,
        classes: Arc<ClassNames>,
        layout: PredictionLayout,
    ) -> Self {
        Self {
            storage,
            model,
            records,
            classes,
            layout,
        }
    }

    pub async fn predict(&self, img_name: Option<&str>) -> Result<PredictionResponse, DetectError> {
        let prediction_id = new_prediction_id();
        info!("prediction: {}. start processing", prediction_id);

        let result = self.run(&prediction_id, img_name).await;
        match &result {
            Ok(response) => info!(
                "prediction: {}. done, {} objects",
                prediction_id,
                response.predictions.len()
            ),
            Err(e) => error!("prediction: {}. failed: {}", prediction_id, e),
        }
        result
    }

    async fn run(&self, prediction_id: &str, img_name: Option<&str>) -> Result<PredictionResponse, DetectError> {
        let img_name = match img_name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(DetectError::MissingImageName),
        };
        if !is_valid_image_name(img_name) {
            return Err(DetectError::InvalidImageName(img_name.to_string()));
        }

        let original_img_path = self.layout.original_image(prediction_id, img_name);
        self.storage
            .download(img_name, &original_img_path)
            .await
            .map_err(DetectError::Download)?;
        info!(
            "prediction: {}/{}. download img completed",
            prediction_id,
            original_img_path.display()
        );

        let output_dir = self.layout.output_dir(prediction_id);
        tokio::fs::create_dir_all(&output_dir).await?;
        self.model
            .detect(&DetectionJob {
                source: &original_img_path,
                output_dir: &output_dir,
            })
            .await?;
        info!("prediction: {}. model finished", prediction_id);

        let original = original_img_path.to_string_lossy().into_owned();
        let labels = self.read_labels(prediction_id, img_name, &original).await?;

        let predicted_key = PredictionLayout::predicted_key(prediction_id, img_name);
        let annotated = self.layout.annotated_image(prediction_id, img_name);
        self.storage
            .put(&annotated, &predicted_key)
            .await
            .map_err(DetectError::Publish)?;

        let record = PredictionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            labels,
            image_paths: ImagePaths {
                original,
                predicted: predicted_key,
            },
            prediction_id: prediction_id.to_string(),
            time: epoch_seconds(),
        };
        self.records.insert(&record).await?;

        Ok(PredictionResponse::from(&record))
    }

    /// An absent label file means no result; an empty one means zero detections.
    async fn read_labels(
        &self,
        prediction_id: &str,
        img_name: &str,
        original_img_path: &str,
    ) -> Result<Vec<crate::types::Label>, DetectError> {
        let label_file = self.layout.label_file(prediction_id, img_name);
        let content = match tokio::fs::read_to_string(&label_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let labels_dir = self.layout.labels_dir(prediction_id);
                if tokio::fs::try_exists(&labels_dir).await.unwrap_or(false) {
                    warn!("prediction: {}. label file not found at {}", prediction_id, label_file.display());
                } else {
                    warn!("prediction: {}. labels directory {} does not exist", prediction_id, labels_dir.display());
                }
                return Err(DetectError::PredictionNotFound {
                    prediction_id: prediction_id.to_string(),
                    original_img_path: original_img_path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let labels = parse_labels(&content, &self.classes)?;
        info!("prediction: {}. prediction summary: {:?}", prediction_id, labels);
        Ok(labels)
    }
}


#[derive(Clone)]
pub struct DetectorState {
    pub detector: Arc<Detector>,
}


pub async fn predict_handler(
    State(state): State<DetectorState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, DetectError> {
    let img_name = match payload {
        Ok(Json(req)) => req.img_name,
        Err(rejection) => {
            warn!("unreadable /predict body: {}", rejection);
            None
        }
    };
    info!("received imgName: {:?}", img_name);

    let response = state.detector.predict(img_name.as_deref()).await?;
    Ok(Json(response))
}


pub async fn healthy() -> Json<HealthResponse> {
    Json(HealthResponse {
        is_healthy: true,
        status: "OK".to_string(),
    })
}


pub fn routes() -> Router<DetectorState> {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(healthy))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::records::memory::MemoryResultStore;
    use crate::storage::LocalObjectStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// What the stub model leaves behind.
    #[derive(Clone)]
    enum Output {
        Labels(&'static str),
        NoLabelFile,
        NoLabelDir,
        Fail,
    }

    struct StubModel {
        output: Output,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(output: Output) -> Self {
            Self {
                output,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DetectionModel for StubModel {
        async fn detect(&self, job: &DetectionJob<'_>) -> Result<(), ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Output::Fail = self.output {
                return Err(ModelError::Exit {
                    status: "exit status: 1".to_string(),
                    stderr: "boom".to_string(),
                });
            }

            let name = job.source.file_name().unwrap();
            let stem = job.source.file_stem().unwrap().to_string_lossy().into_owned();
            tokio::fs::create_dir_all(job.output_dir).await.unwrap();
            tokio::fs::copy(job.source, job.output_dir.join(name)).await.unwrap();

            match self.output {
                Output::Labels(content) => {
                    let labels = job.output_dir.join("labels");
                    tokio::fs::create_dir_all(&labels).await.unwrap();
                    tokio::fs::write(labels.join(format!("{stem}.txt")), content).await.unwrap();
                }
                Output::NoLabelFile => {
                    tokio::fs::create_dir_all(job.output_dir.join("labels")).await.unwrap();
                }
                Output::NoLabelDir | Output::Fail => {}
            }
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        model: Arc<StubModel>,
        records: Arc<MemoryResultStore>,
        detector: Arc<Detector>,
    }

    async fn fixture(output: Output) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("bucket");
        tokio::fs::create_dir_all(&bucket).await.unwrap();
        tokio::fs::write(bucket.join("street.jpg"), b"fake jpeg").await.unwrap();

        let storage = Arc::new(LocalObjectStore::new(&bucket, Duration::from_secs(5)));
        let model = Arc::new(StubModel::new(output));
        let records = Arc::new(MemoryResultStore::default());
        let classes = ClassNames::new(vec!["person".into(), "bicycle".into(), "car".into()]).unwrap();

        let detector = Arc::new(Detector::new(
            storage,
            model.clone(),
            records.clone(),
            Arc::new(classes),
            PredictionLayout::new(dir.path().join("static/data")),
        ));

        Fixture {
            dir,
            model,
            records,
            detector,
        }
    }

    fn app(fixture: &Fixture) -> Router {
        routes().with_state(DetectorState {
            detector: fixture.detector.clone(),
        })
    }

    async fn post_predict(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_prediction_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_prediction_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn test_predict_success() {
        let fx = fixture(Output::Labels("0 0.5 0.5 0.2 0.4\n2 0.1 0.2 0.05 0.05\n")).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": "street.jpg"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"].as_array().unwrap().len(), 2);
        assert_eq!(body["predictions"][0]["class"], "person");
        assert_eq!(body["predictions"][1]["class"], "car");
        assert_eq!(body["predictions"][1]["cx"], 0.1);

        let prediction_id = body["prediction_id"].as_str().unwrap();
        assert_eq!(
            body["predicted_img_path"],
            format!("predictions/{prediction_id}/street.jpg")
        );
        assert!(
            body["original_img_path"]
                .as_str()
                .unwrap()
                .ends_with(&format!("{prediction_id}/street.jpg"))
        );

        let records = fx.records.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prediction_id, prediction_id);
        assert_eq!(records[0].labels.len(), 2);
        assert_ne!(records[0].id, prediction_id);
        assert!(records[0].time > 0.0);

        let published = fx
            .dir
            .path()
            .join("bucket/predictions")
            .join(prediction_id)
            .join("street.jpg");
        assert_eq!(tokio::fs::read(published).await.unwrap(), b"fake jpeg");
    }

    #[tokio::test]
    async fn test_missing_img_name() {
        let fx = fixture(Output::Labels("")).await;

        let (status, body) = post_predict(app(&fx), "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"error": "Missing imgName parameter"}));
        assert_eq!(fx.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_or_unreadable_body_is_missing_parameter() {
        let fx = fixture(Output::Labels("")).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing imgName parameter");

        let (status, body) = post_predict(app(&fx), "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing imgName parameter");
    }

    #[tokio::test]
    async fn test_path_like_img_name_is_rejected() {
        let fx = fixture(Output::Labels("")).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": "../bucket/street.jpg"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid imgName parameter");
    }

    #[tokio::test]
    async fn test_image_not_in_storage() {
        let fx = fixture(Output::Labels("")).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": "x.jpg"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"error": "Failed to download image from S3"}));
        assert_eq!(fx.model.calls.load(Ordering::SeqCst), 0);
        assert!(fx.records.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_label_file_is_not_found() {
        for output in [Output::NoLabelFile, Output::NoLabelDir] {
            let fx = fixture(output).await;

            let (status, body) = post_predict(app(&fx), r#"{"imgName": "street.jpg"}"#).await;

            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Prediction result not found");
            let prediction_id = body["prediction_id"].as_str().unwrap();
            assert!(
                body["original_img_path"]
                    .as_str()
                    .unwrap()
                    .ends_with(&format!("{prediction_id}/street.jpg"))
            );
            assert!(fx.records.all().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_empty_label_file_is_zero_detections() {
        let fx = fixture(Output::Labels("")).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": "street.jpg"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"], serde_json::json!([]));
        assert_eq!(fx.records.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_labels_fail_whole_request() {
        for content in ["0 0.5 0.5 0.2 0.4\n1 0.5 oops 0.2 0.4\n", "0 0.5 0.5 0.2 0.4\n9 0.5 0.5 0.2 0.4\n"] {
            let fx = fixture(Output::Labels(content)).await;

            let (status, body) = post_predict(app(&fx), r#"{"imgName": "street.jpg"}"#).await;

            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["error"], "Failed to parse prediction result");
            assert!(body.get("predictions").is_none());
            assert!(fx.records.all().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_model_failure() {
        let fx = fixture(Output::Fail).await;

        let (status, body) = post_predict(app(&fx), r#"{"imgName": "street.jpg"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Object detection failed");
        assert!(fx.records.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_collide() {
        let fx = fixture(Output::Labels("1 0.5 0.5 0.5 0.5\n")).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let detector = fx.detector.clone();
                tokio::spawn(async move { detector.predict(Some("street.jpg")).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.predictions[0].class_name, "bicycle");
            ids.insert(response.prediction_id);
        }

        assert_eq!(ids.len(), 8);
        assert_eq!(fx.records.all().await.len(), 8);
        for id in &ids {
            assert!(Path::new(&fx.dir.path().join("static/data").join(id)).is_dir());
        }
    }

    #[tokio::test]
    async fn test_health() {
        let fx = fixture(Output::Labels("")).await;
        let response = app(&fx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
