use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ChatError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";


/// What the conversation handler needs from the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChatError>;

    async fn send_photo(&self, chat_id: i64, img_path: &Path) -> Result<(), ChatError>;

    /// Resolves a file id to the platform's file path.
    async fn file_path(&self, file_id: &str) -> Result<String, ChatError>;

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChatError>;
}


#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}


/// Bot API client over plain HTTPS.
pub struct TelegramClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        Self::with_api_base(token, DEFAULT_API_BASE, timeout)
    }

    pub fn with_api_base(
        token: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, ChatError> {
        let body: ApiResponse<T> = response.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(ChatError::Api {
                method: method.to_string(),
                description: "response has no result".to_string(),
            }),
            (false, _) => Err(ChatError::Api {
                method: method.to_string(),
                description: body.description.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, ChatError> {
        debug!("telegram call {}", method);
        let response = self.http.post(self.method_url(method)).json(body).send().await?;
        Self::unwrap_response(method, response).await
    }

    pub async fn get_me(&self) -> Result<BotUser, ChatError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn delete_webhook(&self) -> Result<(), ChatError> {
        let _: bool = self.call("deleteWebhook", &json!({})).await?;
        Ok(())
    }

    pub async fn set_webhook(&self, url: &str) -> Result<(), ChatError> {
        let _: bool = self.call("setWebhook", &json!({ "url": url })).await?;
        Ok(())
    }

    /// Replaces whatever webhook is registered with `{app_url}/{token}/`.
    pub async fn register_webhook(&self, app_url: &str) -> Result<(), ChatError> {
        self.delete_webhook().await?;
        let url = format!("{}/{}/", app_url.trim_end_matches('/'), self.token);
        self.set_webhook(&url).await?;
        info!("telegram webhook registered under {}", app_url);
        Ok(())
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChatError> {
        let _: serde_json::Value = self
            .call("sendMessage", &SendMessage { chat_id, text })
            .await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, img_path: &Path) -> Result<(), ChatError> {
        let data = tokio::fs::read(img_path).await?;
        let file_name = img_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", Part::bytes(data).file_name(file_name));

        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = Self::unwrap_response("sendPhoto", response).await?;
        Ok(())
    }

    async fn file_path(&self, file_id: &str) -> Result<String, ChatError> {
        let file: TelegramFile = self.call("getFile", &json!({ "file_id": file_id })).await?;
        file.file_path.ok_or_else(|| ChatError::Api {
            method: "getFile".to_string(),
            description: format!("file {} has no path", file_id),
        })
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChatError> {
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
