//! ABOUTME: Log store abstraction and the MongoDB implementation
//! ABOUTME: Batched inserts into cron.log plus the per-job recency query

use async_trait::async_trait;
use cw_core::{Error, JobLog, Result};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection};
use std::time::Duration;

/// Destination for flushed log batches.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert_many(&self, logs: Vec<JobLog>) -> Result<()>;
}

/// MongoDB-backed log store writing to the `cron.log` collection.
pub struct MongoLogStore {
    collection: Collection<JobLog>,
}

impl MongoLogStore {
    pub async fn connect(uri: &str, connect_timeout: Duration) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| Error::LogStore(format!("invalid mongodb uri: {}", e)))?;
        options.connect_timeout = Some(connect_timeout);
        options.server_selection_timeout = Some(connect_timeout);

        let client = Client::with_options(options)
            .map_err(|e| Error::LogStore(format!("mongodb client init failed: {}", e)))?;

        Ok(Self {
            collection: client.database("cron").collection("log"),
        })
    }

    /// Most recent executions of one job, newest first.
    ///
    /// This is the query shape master-side readers use: filter on
    /// `jobName`, sort by `startTime` descending.
    pub async fn recent_for_job(&self, job_name: &str, limit: i64) -> Result<Vec<JobLog>> {
        let options = FindOptions::builder()
            .sort(doc! { "startTime": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .collection
            .find(doc! { "jobName": job_name }, options)
            .await
            .map_err(|e| Error::LogStore(format!("log query failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| Error::LogStore(format!("log cursor failed: {}", e)))
    }
}

#[async_trait]
impl LogStore for MongoLogStore {
    async fn insert_many(&self, logs: Vec<JobLog>) -> Result<()> {
        self.collection
            .insert_many(logs, None)
            .await
            .map_err(|e| Error::LogStore(format!("batch insert failed: {}", e)))?;
        Ok(())
    }
}
