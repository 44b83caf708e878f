use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::{
    Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use tracing::{error, info, warn};

use crate::inference::Predictor;
use crate::storage::ObjectStore;
use crate::telegram::ChatClient;
use crate::types::{InboundMessage, Label, PhotoSize, PredictionResponse};

pub const SEND_PHOTO_PROMPT: &str = "Please send a photo for object detection.";
pub const UPLOADED_ACK: &str = "Image uploaded to S3. Processing...";
pub const NO_OBJECTS: &str = "No objects detected.";
pub const PROCESSING_ERROR: &str = "There was an error processing the image.";


pub fn summarize(predictions: &[Label]) -> String {
    if predictions.is_empty() {
        return NO_OBJECTS.to_string();
    }
    let names: Vec<&str> = predictions.iter().map(|l| l.class_name.as_str()).collect();
    format!("Detected objects: {}", names.join(", "))
}


/// Conversation handler: photo in, list of detected objects out.
pub struct ObjectDetectionBot {
    chat: Arc<dyn ChatClient>,
    storage: Arc<dyn ObjectStore>,
    predictor: Arc<dyn Predictor>,
    photos_dir: PathBuf,
    send_annotated: bool,
}

impl ObjectDetectionBot {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        storage: Arc<dyn ObjectStore>,
        predictor: Arc<dyn Predictor>,
        photos_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chat,
            storage,
            predictor,
            photos_dir: photos_dir.into(),
            send_annotated: false,
        }
    }

    /// Also reply with the annotated image after the text summary.
    pub fn with_annotated_reply(mut self, enabled: bool) -> Self {
        self.send_annotated = enabled;
        self
    }

    /// Never fails: every path ends with a reply to the chat.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        let chat_id = msg.chat.id;
        info!("incoming message in chat {}", chat_id);

        let Some(photo) = msg.largest_photo() else {
            info!("message in chat {} does not contain a photo", chat_id);
            self.reply(chat_id, SEND_PHOTO_PROMPT).await;
            return;
        };

        match self.process_photo(chat_id, photo).await {
            Ok(response) => {
                self.reply(chat_id, &summarize(&response.predictions)).await;
                if self.send_annotated && !response.predicted_img_path.is_empty() {
                    if let Err(e) = self.send_annotated_image(chat_id, &response).await {
                        warn!("could not send annotated image to chat {}: {:#}", chat_id, e);
                    }
                }
            }
            Err(e) => {
                error!("error processing image from chat {}: {:#}", chat_id, e);
                self.reply(chat_id, PROCESSING_ERROR).await;
            }
        }
    }

    async fn process_photo(&self, chat_id: i64, photo: &PhotoSize) -> anyhow::Result<PredictionResponse> {
        info!("step 1: downloading user photo");
        let photo_path = self.download_user_photo(photo).await?;

        info!("step 2: uploading {} to storage", photo_path.display());
        let img_name = file_name(&photo_path)?;
        let url = self
            .storage
            .put(&photo_path, &img_name)
            .await
            .context("uploading photo")?;
        info!("photo uploaded to {}", url);
        self.reply(chat_id, UPLOADED_ACK).await;

        info!("step 3: requesting prediction for {}", img_name);
        let response = self
            .predictor
            .request_prediction(&img_name)
            .await
            .context("requesting prediction")?;
        info!("prediction {} returned {} objects", response.prediction_id, response.predictions.len());
        Ok(response)
    }

    /// Saves the photo under the last segment of the platform's file path.
    async fn download_user_photo(&self, photo: &PhotoSize) -> anyhow::Result<PathBuf> {
        let remote_path = self
            .chat
            .file_path(&photo.file_id)
            .await
            .context("resolving photo file")?;
        let data = self
            .chat
            .download_file(&remote_path)
            .await
            .context("downloading photo")?;

        let name = match remote_path.rsplit('/').next() {
            Some(name) if crate::layout::is_valid_image_name(name) => name,
            _ => bail!("unusable photo file path `{}`", remote_path),
        };
        tokio::fs::create_dir_all(&self.photos_dir).await?;
        let local_path = self.photos_dir.join(name);
        tokio::fs::write(&local_path, data)
            .await
            .with_context(|| format!("writing {}", local_path.display()))?;
        Ok(local_path)
    }

    async fn send_annotated_image(&self, chat_id: i64, response: &PredictionResponse) -> anyhow::Result<()> {
        let local_path = self
            .photos_dir
            .join("predicted")
            .join(&response.prediction_id)
            .join(file_name(Path::new(&response.predicted_img_path))?);
        self.storage
            .download(&response.predicted_img_path, &local_path)
            .await?;
        self.chat.send_photo(chat_id, &local_path).await?;
        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.chat.send_text(chat_id, text).await {
            error!("failed to reply to chat {}: {}", chat_id, e);
        }
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}


#[derive(Clone)]
pub struct BotState {
    pub bot: Arc<ObjectDetectionBot>,
}


pub async fn webhook_handler(State(state): State<BotState>, body: Bytes) -> &'static str {
    let update: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("ignoring unreadable webhook body: {}", e);
            return "Ok";
        }
    };

    match InboundMessage::from_update(update) {
        Ok(Some(msg)) => state.bot.handle_message(&msg).await,
        Ok(None) => info!("webhook update without a message, ignoring"),
        Err(e) => warn!("ignoring malformed message: {}", e),
    }
    "Ok"
}


pub async fn index() -> &'static str {
    "Ok"
}


/// The webhook lives under the secret path, as registered with Telegram.
pub fn routes(secret: &str) -> Router<BotState> {
    Router::new()
        .route("/", get(index))
        .route(&format!("/{}/", secret), post(webhook_handler))
}
