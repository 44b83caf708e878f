use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use tracing::info;

use crate::error::RecordError;
use crate::types::PredictionRecord;

const DUPLICATE_KEY: i32 = 11000;


/// Append-only log of prediction records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, record: &PredictionRecord) -> Result<(), RecordError>;

    async fn find(&self, prediction_id: &str) -> Result<Option<PredictionRecord>, RecordError>;
}


pub struct MongoResultStore {
    collection: Collection<PredictionRecord>,
}

impl MongoResultStore {
    /// Opens the process-wide connection and makes sure `prediction_id` is unique.
    pub async fn connect(uri: &str, db_name: &str, collection_name: &str) -> Result<Self, RecordError> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client
            .database(db_name)
            .collection::<PredictionRecord>(collection_name);

        let index = IndexModel::builder()
            .keys(doc! { "prediction_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index).await?;

        info!("connected to mongodb collection {}.{}", db_name, collection_name);
        Ok(Self { collection })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl ResultStore for MongoResultStore {
    async fn insert(&self, record: &PredictionRecord) -> Result<(), RecordError> {
        match self.collection.insert_one(record).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(RecordError::Duplicate(record.prediction_id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, prediction_id: &str) -> Result<Option<PredictionRecord>, RecordError> {
        let record = self
            .collection
            .find_one(doc! { "prediction_id": prediction_id })
            .await?;
        Ok(record)
    }
}
