//! MongoDB client and typed collection wrapper

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{FindOptions, IndexOptions, ReplaceOptions, UpdateModifications, UpdateOptions},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::{MirrorError, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| MirrorError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MirrorError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, applying its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };
        mongo_collection.apply_indexes().await?;
        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();
        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| MirrorError::Database(format!("Failed to create indexes: {}", e)))?;
        Ok(())
    }

    /// Insert `item` only if nothing matches `filter`. Returns true when inserted.
    pub async fn insert_if_absent(&self, filter: Document, mut item: T) -> Result<bool> {
        let metadata = item.mut_metadata();
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = metadata.created_at;

        let mut document = bson::to_document(&item)?;
        // The upsert takes _id from the filter
        document.remove("_id");
        let result = self
            .inner
            .update_one(filter, doc! { "$setOnInsert": document })
            .with_options(UpdateOptions::builder().upsert(true).build())
            .await
            .map_err(|e| MirrorError::Database(format!("Upsert failed: {}", e)))?;
        Ok(result.upserted_id.is_some())
    }

    /// Replace the document matching `filter`, inserting it if missing
    pub async fn replace_upsert(&self, filter: Document, mut item: T) -> Result<()> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.updated_at = Some(now);
        if metadata.created_at.is_none() {
            metadata.created_at = Some(now);
        }

        self.inner
            .replace_one(filter, item)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| MirrorError::Database(format!("Replace failed: {}", e)))?;
        Ok(())
    }

    pub async fn insert_many(&self, mut items: Vec<T>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let now = DateTime::now();
        for item in items.iter_mut() {
            let metadata = item.mut_metadata();
            metadata.created_at = Some(now);
            metadata.updated_at = Some(now);
        }
        self.inner
            .insert_many(items)
            .await
            .map_err(|e| MirrorError::Database(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| MirrorError::Database(format!("Find failed: {}", e)))
    }

    /// Find documents with an explicit sort and optional limit
    pub async fn find_sorted(
        &self,
        filter: Document,
        sort: Document,
        limit: Option<i64>,
    ) -> Result<Vec<T>> {
        let options = FindOptions::builder().sort(sort).limit(limit).build();
        let cursor = self
            .inner
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| MirrorError::Database(format!("Find failed: {}", e)))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| MirrorError::Database(format!("Cursor read failed: {}", e)))
    }

    pub async fn count(&self, filter: Document) -> Result<u64> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(|e| MirrorError::Database(format!("Count failed: {}", e)))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update.into())
            .with_options(UpdateOptions::builder().upsert(upsert).build())
            .await
            .map_err(|e| MirrorError::Database(format!("Update failed: {}", e)))
    }

    pub async fn update_many(&self, filter: Document, update: Document) -> Result<u64> {
        let result = self
            .inner
            .update_many(filter, update)
            .await
            .map_err(|e| MirrorError::Database(format!("Update failed: {}", e)))?;
        Ok(result.modified_count)
    }

    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        let result = self
            .inner
            .delete_many(filter)
            .await
            .map_err(|e| MirrorError::Database(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count)
    }
}
