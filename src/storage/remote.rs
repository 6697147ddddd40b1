//! REST client for the remote document store.
//!
//! Request/response contract, relative to the configured base URL:
//! - `GET  /{collection}?ownerId=..&orderBy=createdAt&direction=desc` -> `[{"id": .., ..}]`
//! - `GET  /{collection}/{id}` -> `{"id": .., ..}` or 404
//! - `POST /{collection}` with the document body -> `{"id": ..}`
//! - `PATCH /{collection}/{id}` with the changed fields -> 2xx, 404 when absent
//! - `DELETE /{collection}/{id}` -> 2xx, or 404 when already absent

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::cloud_store::DocumentClient;
use super::{Payload, Record, StorageError, StorageResult, FIELD_ID};

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: String,
}

/// Document store client over HTTP
#[derive(Clone)]
pub struct HttpDocumentClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDocumentClient {
    pub fn new(base_url: &str, token: Option<String>) -> StorageResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Remote(format!("{}: {}", status, body)))
    }
}

/// Split a document object into its id and remaining fields
fn into_record(value: Value) -> StorageResult<Record> {
    let Value::Object(mut fields) = value else {
        return Err(StorageError::Remote("document is not an object".to_string()));
    };
    let id = match fields.remove(FIELD_ID) {
        Some(Value::String(id)) => id,
        _ => return Err(StorageError::Remote("document has no id".to_string())),
    };
    Record::from_document(id, fields)
}

#[async_trait]
impl DocumentClient for HttpDocumentClient {
    async fn query_by_owner(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>> {
        let request = self.client.get(self.collection_url(collection)).query(&[
            ("ownerId", owner_id),
            ("orderBy", "createdAt"),
            ("direction", "desc"),
        ]);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let documents: Vec<Value> = response.json().await?;
        debug!("Queried {} documents from {}", documents.len(), collection);
        documents.into_iter().map(into_record).collect()
    }

    async fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Record>> {
        let request = self.client.get(self.document_url(collection, id));
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document: Value = Self::check(response).await?.json().await?;
        into_record(document).map(Some)
    }

    async fn add_document(&self, collection: &str, fields: Payload) -> StorageResult<String> {
        let request = self.client.post(self.collection_url(collection)).json(&fields);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let created: CreatedDocument = response.json().await?;
        Ok(created.id)
    }

    async fn patch_document(
        &self,
        collection: &str,
        id: &str,
        fields: Payload,
    ) -> StorageResult<()> {
        let request = self.client.patch(self.document_url(collection, id)).json(&fields);
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(collection, id));
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> StorageResult<()> {
        let request = self.client.delete(self.document_url(collection, id));
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}
