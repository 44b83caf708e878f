use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};


#[derive(Debug, Parser)]
#[command(name = "server", about = "Telegram object-detection bot and its YOLO prediction service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the Telegram webhook and conversation handler
    Bot(BotConfig),
    /// Run the `/predict` detection service
    Detector(DetectorConfig),
}


#[derive(Clone, Debug, Args)]
pub struct BotConfig {
    /// Public base URL Telegram should call
    #[arg(long, env = "TELEGRAM_APP_URL")]
    pub app_url: String,

    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: String,

    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Secret file with the bot token; wins over TELEGRAM_TOKEN when it exists
    #[arg(long, env = "TELEGRAM_TOKEN_FILE", default_value = "/run/secrets/telegram_token")]
    pub telegram_token_file: PathBuf,

    #[arg(long, env = "YOLO_URL", default_value = "http://yolov5:8081/predict")]
    pub yolo_url: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8443")]
    pub bind: SocketAddr,

    #[arg(long, env = "PHOTOS_DIR", default_value = "photos")]
    pub photos_dir: PathBuf,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Also send the annotated image back to the chat
    #[arg(long, env = "SEND_ANNOTATED_IMAGE")]
    pub send_annotated_image: bool,

    /// Use this directory instead of S3
    #[arg(long, env = "STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl BotConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resolve_token(&self) -> anyhow::Result<String> {
        read_token(&self.telegram_token_file, self.telegram_token.as_deref())
    }
}

fn read_token(secret_file: &Path, from_env: Option<&str>) -> anyhow::Result<String> {
    if secret_file.is_file() {
        let token = std::fs::read_to_string(secret_file)
            .with_context(|| format!("reading {}", secret_file.display()))?;
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }
    match from_env.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => bail!(
            "telegram token is not set: provide {} or TELEGRAM_TOKEN",
            secret_file.display()
        ),
    }
}


#[derive(Clone, Debug, Args)]
pub struct DetectorConfig {
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: String,

    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    pub mongo_uri: String,

    #[arg(long, env = "MONGO_DB", default_value = "default_db")]
    pub mongo_db: String,

    #[arg(long, env = "MONGO_COLLECTION", default_value = "predictions")]
    pub mongo_collection: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8081")]
    pub bind: SocketAddr,

    /// Root of the per-prediction working directories
    #[arg(long, env = "DATA_DIR", default_value = "static/data")]
    pub data_dir: PathBuf,

    /// Dataset yaml whose `names` maps class indices to names
    #[arg(long, env = "CLASSES_FILE", default_value = "data/coco128.yaml")]
    pub classes_file: PathBuf,

    #[arg(long, env = "YOLO_WEIGHTS", default_value = "yolov5s.pt")]
    pub weights: PathBuf,

    #[arg(long, env = "YOLO_SCRIPT", default_value = "detect.py")]
    pub detect_script: PathBuf,

    #[arg(long, env = "PYTHON", default_value = "python3")]
    pub python: PathBuf,

    #[arg(long, env = "MODEL_TIMEOUT_SECS", default_value_t = 300)]
    pub model_timeout_secs: u64,

    #[arg(long, env = "STORAGE_TIMEOUT_SECS", default_value_t = 60)]
    pub storage_timeout_secs: u64,

    #[arg(long, env = "STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl DetectorConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults() {
        let cli = Cli::try_parse_from([
            "server",
            "detector",
            "--bucket",
            "images",
            "--mongo-uri",
            "mongodb://localhost:27017",
        ])
        .unwrap();

        let Command::Detector(config) = cli.command else {
            panic!("expected detector subcommand");
        };
        assert_eq!(config.bucket, "images");
        assert_eq!(config.mongo_db, "default_db");
        assert_eq!(config.mongo_collection, "predictions");
        assert_eq!(config.bind.port(), 8081);
        assert_eq!(config.data_dir, PathBuf::from("static/data"));
        assert_eq!(config.model_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_bot_flags() {
        let cli = Cli::try_parse_from([
            "server",
            "bot",
            "--app-url",
            "https://bot.example.com",
            "--bucket",
            "images",
            "--telegram-token",
            "123:abc",
            "--send-annotated-image",
        ])
        .unwrap();

        let Command::Bot(config) = cli.command else {
            panic!("expected bot subcommand");
        };
        assert_eq!(config.app_url, "https://bot.example.com");
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
        assert!(config.send_annotated_image);
        assert_eq!(config.bind.port(), 8443);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_secret_file_wins_over_env_token() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("telegram_token");
        std::fs::write(&secret, "456:from-file\n").unwrap();

        assert_eq!(read_token(&secret, Some("123:from-env")).unwrap(), "456:from-file");
    }

    #[test]
    fn test_env_token_when_no_secret_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("telegram_token");

        assert_eq!(read_token(&missing, Some(" 123:abc ")).unwrap(), "123:abc");
        assert!(read_token(&missing, None).is_err());
        assert!(read_token(&missing, Some("")).is_err());
    }

    #[test]
    fn test_empty_secret_file_falls_back_to_env() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("telegram_token");
        std::fs::write(&secret, "\n").unwrap();

        assert_eq!(read_token(&secret, Some("123:abc")).unwrap(), "123:abc");
    }
}
