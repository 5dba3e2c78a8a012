//! [`DocumentFetcher`] backed by the official MongoDB driver.
//!
//! Connects straight to the upstream, never through the proxy.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{Client, Collection};

use super::{AuditError, DocumentFetcher};
use crate::wire::OperationInfo;

pub struct MongoFetcher {
    client: Client,
}

impl MongoFetcher {
    pub async fn connect(uri: &str) -> Result<Self, AuditError> {
        let client = Client::with_uri_str(uri).await.map_err(lookup_error)?;
        Ok(Self { client })
    }

    fn collection(&self, info: &OperationInfo) -> Collection<Document> {
        self.client.database(&info.database).collection(&info.collection)
    }
}

#[async_trait]
impl DocumentFetcher for MongoFetcher {
    async fn resolve_ids(&self, info: &OperationInfo, filter: &Document, many: bool) -> Result<Vec<Bson>, AuditError> {
        let collection = self.collection(info);

        let found: Vec<Document> = if many {
            collection
                .find(filter.clone())
                .projection(doc! { "_id": 1 })
                .await
                .map_err(lookup_error)?
                .try_collect()
                .await
                .map_err(lookup_error)?
        } else {
            collection
                .find_one(filter.clone())
                .projection(doc! { "_id": 1 })
                .await
                .map_err(lookup_error)?
                .into_iter()
                .collect()
        };

        Ok(found.into_iter().filter_map(|mut d| d.remove("_id")).collect())
    }

    async fn fetch_documents(&self, info: &OperationInfo, ids: &[Bson]) -> Result<Vec<Document>, AuditError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.collection(info)
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .await
            .map_err(lookup_error)?
            .try_collect()
            .await
            .map_err(lookup_error)
    }
}

fn lookup_error(err: mongodb::error::Error) -> AuditError {
    AuditError::Lookup(err.to_string())
}
