use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use yolo_polybot::bot::{self, BotState, ObjectDetectionBot};
use yolo_polybot::config::{BotConfig, Cli, Command, DetectorConfig};
use yolo_polybot::detector::{self, Detector, DetectorState};
use yolo_polybot::inference::InferenceClient;
use yolo_polybot::labels::ClassNames;
use yolo_polybot::layout::PredictionLayout;
use yolo_polybot::model::YoloCommand;
use yolo_polybot::records::MongoResultStore;
use yolo_polybot::storage;
use yolo_polybot::telegram::TelegramClient;


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Bot(config) => run_bot(config).await,
        Command::Detector(config) => run_detector(config).await,
    }
}


async fn run_bot(config: BotConfig) -> anyhow::Result<()> {
    let token = config.resolve_token()?;
    let timeout = config.request_timeout();

    let telegram = Arc::new(TelegramClient::new(token.clone(), timeout)?);
    telegram
        .register_webhook(&config.app_url)
        .await
        .context("registering telegram webhook")?;
    let me = telegram.get_me().await.context("fetching bot identity")?;
    info!("telegram bot {} (@{})", me.id, me.username.as_deref().unwrap_or(&me.first_name));

    let store = storage::connect(&config.bucket, config.storage_dir.as_deref(), timeout).await;
    let predictor = Arc::new(InferenceClient::new(&config.yolo_url, timeout)?);

    let handler = ObjectDetectionBot::new(telegram, store, predictor, &config.photos_dir)
        .with_annotated_reply(config.send_annotated_image);
    let app = bot::routes(&token)
        .with_state(BotState { bot: Arc::new(handler) })
        .layer(TraceLayer::new_for_http());

    serve(app, config.bind).await
}


async fn run_detector(config: DetectorConfig) -> anyhow::Result<()> {
    let classes = ClassNames::load(&config.classes_file)
        .await
        .with_context(|| format!("loading class names from {}", config.classes_file.display()))?;
    info!("loaded {} class names", classes.len());

    let store = storage::connect(&config.bucket, config.storage_dir.as_deref(), config.storage_timeout()).await;
    let records = MongoResultStore::connect(&config.mongo_uri, &config.mongo_db, &config.mongo_collection)
        .await
        .context("connecting to mongodb")?;
    let model = YoloCommand {
        python: config.python.clone(),
        script: config.detect_script.clone(),
        weights: config.weights.clone(),
        data: config.classes_file.clone(),
        timeout: config.model_timeout(),
    };

    let worker = Detector::new(
        store,
        Arc::new(model),
        Arc::new(records),
        Arc::new(classes),
        PredictionLayout::new(&config.data_dir),
    );
    let app = detector::routes()
        .with_state(DetectorState {
            detector: Arc::new(worker),
        })
        .layer(TraceLayer::new_for_http());

    serve(app, config.bind).await
}


async fn serve(app: Router, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
