use serde::{Deserialize, Serialize};


/// Body of `POST /predict`.
#[derive(Debug, Deserialize, Serialize)]
pub struct PredictRequest {
    #[serde(rename = "imgName", default)]
    pub img_name: Option<String>,
}


/// One detected object: class name plus a normalized bounding box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(rename = "class")]
    pub class_name: String,
    // the bot only reads class names, so the box is optional on the way in
    #[serde(default)]
    pub cx: f64,
    #[serde(default)]
    pub cy: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}


#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePaths {
    pub original: String,
    pub predicted: String,
}


/// Document written to the result store, one per prediction id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub labels: Vec<Label>,
    pub image_paths: ImagePaths,
    pub prediction_id: String,
    pub time: f64,
}


/// What `/predict` answers on success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<Label>,
    #[serde(default)]
    pub prediction_id: String,
    #[serde(default)]
    pub original_img_path: String,
    #[serde(default)]
    pub predicted_img_path: String,
}

impl From<&PredictionRecord> for PredictionResponse {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            predictions: record.labels.clone(),
            prediction_id: record.prediction_id.clone(),
            original_img_path: record.image_paths.original.clone(),
            predicted_img_path: record.image_paths.predicted.clone(),
        }
    }
}


#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub is_healthy: bool,
    pub status: String,
}


#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
}


#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}


#[derive(Deserialize)]
struct MessageFields {
    #[serde(default)]
    message_id: Option<i64>,
    chat: Chat,
    #[serde(default)]
    photo: Option<Vec<PhotoSize>>,
}


/// A chat message as delivered by the webhook. Never mutated after parsing.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message_id: Option<i64>,
    pub chat: Chat,
    pub photo: Option<Vec<PhotoSize>>,
    pub raw: serde_json::Value,
}

impl InboundMessage {
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        let fields = MessageFields::deserialize(&raw)?;
        Ok(Self {
            message_id: fields.message_id,
            chat: fields.chat,
            photo: fields.photo,
            raw,
        })
    }

    /// Extracts the `message` of a webhook update, if it has one.
    pub fn from_update(update: serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        match update {
            serde_json::Value::Object(mut map) => match map.remove("message") {
                Some(message) => Self::from_value(message).map(Some),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Telegram orders the size variants from smallest to largest.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo.as_ref().and_then(|sizes| sizes.last())
    }
}
