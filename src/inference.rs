use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::InferenceError;
use crate::types::{PredictRequest, PredictionResponse};


#[async_trait]
pub trait Predictor: Send + Sync {
    async fn request_prediction(&self, img_name: &str) -> Result<PredictionResponse, InferenceError>;
}


/// Calls the detector's `/predict` endpoint. No retries.
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl InferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

fn decode(body: serde_json::Value) -> Result<PredictionResponse, InferenceError> {
    match body.get("predictions") {
        Some(serde_json::Value::Array(_)) => {}
        Some(_) => return Err(InferenceError::Shape("`predictions` is not a list".to_string())),
        None => return Err(InferenceError::Shape("`predictions` is missing".to_string())),
    }
    serde_json::from_value(body).map_err(|e| InferenceError::Shape(e.to_string()))
}

#[async_trait]
impl Predictor for InferenceClient {
    async fn request_prediction(&self, img_name: &str) -> Result<PredictionResponse, InferenceError> {
        info!("sending imgName to detection service: {}", img_name);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&PredictRequest {
                img_name: Some(img_name.to_string()),
            })
            .send()
            .await?;

        let status = response.status();
        debug!("detection service answered {}", status);
        if !status.is_success() {
            return Err(InferenceError::Status(status));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Shape(e.to_string()))?;
        decode(body)
    }
}
