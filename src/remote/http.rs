//! HTTP Document Store Client
//!
//! Information Hiding:
//! - REST paths, auth header and JSON payloads hidden behind RemoteStore
//! - Transport errors and non-success statuses folded into RemoteUnavailable
//! - Malformed documents skipped, never surfaced as hard failures
//!
//! Layout: `{base_url}/{collection}/{conversation_id}` for single documents,
//! `{base_url}/{collection}?userId=..&limit=..` for owner queries. The id is
//! pushed as one percent-encoded path segment.

use super::{select_for_owner, RemoteDocument, RemoteStore};
use crate::core::backup::ConversationBackup;
use crate::core::timestamp;
use crate::error::{PersistenceError, PersistenceResult};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;

pub struct HttpDocumentStore {
    client: Client,
    base_url: Url,
    collection: String,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> PersistenceResult<Self> {
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                PersistenceError::RemoteUnavailable(format!("invalid base url '{}'", base_url))
            })?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            collection: collection.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Base url with each segment appended, escaped so it stays one segment
    fn url_with(&self, segments: &[&str]) -> PersistenceResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PersistenceError::RemoteUnavailable(format!(
                    "base url '{}' cannot take path segments",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self) -> PersistenceResult<Url> {
        self.url_with(&[self.collection.as_str()])
    }

    fn document_url(&self, conversation_id: &str) -> PersistenceResult<Url> {
        self.url_with(&[self.collection.as_str(), conversation_id])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn ensure_success(response: Response, action: &str) -> PersistenceResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::warn!(
            "[HttpDocumentStore] {} returned error status {}: {}",
            action,
            status,
            error_text
        );
        Err(PersistenceError::RemoteUnavailable(format!(
            "{} failed with {}: {}",
            action, status, error_text
        )))
    }

    fn parse_document(value: Value) -> Option<RemoteDocument> {
        match serde_json::from_value::<RemoteDocument>(value) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!("[HttpDocumentStore] Skipping malformed document: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl RemoteStore for HttpDocumentStore {
    async fn save(&self, backup: &ConversationBackup) -> PersistenceResult<()> {
        let url = self.document_url(backup.conversation_id())?;
        let document = RemoteDocument::from_backup(backup);

        let response = self.request(Method::PUT, url).json(&document).send().await?;
        Self::ensure_success(response, "PUT document").await?;

        tracing::debug!(
            "[HttpDocumentStore] Upserted '{}' at revision {}",
            backup.conversation_id(),
            backup.revision
        );
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> PersistenceResult<Option<ConversationBackup>> {
        let url = self.document_url(conversation_id)?;
        let response = self.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, "GET document").await?;
        let value: Value = response.json().await?;

        Ok(Self::parse_document(value)
            .filter(|doc| !doc.deleted)
            .map(RemoteDocument::into_backup))
    }

    async fn list_all(
        &self,
        user_id: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<ConversationBackup>> {
        let url = self.collection_url()?;
        let limit_param = limit.to_string();
        let response = self
            .request(Method::GET, url)
            .query(&[
                ("userId", user_id),
                ("limit", limit_param.as_str()),
                ("orderBy", "updatedAt:desc"),
            ])
            .send()
            .await?;
        let response = Self::ensure_success(response, "GET collection").await?;
        let values: Vec<Value> = response.json().await?;

        let backups = select_for_owner(
            values.into_iter().filter_map(Self::parse_document),
            user_id,
            limit,
        );
        tracing::debug!(
            "[HttpDocumentStore] Listed {} conversations for '{}'",
            backups.len(),
            user_id
        );
        Ok(backups)
    }

    async fn delete(&self, conversation_id: &str) -> PersistenceResult<()> {
        let url = self.document_url(conversation_id)?;
        let patch = json!({
            "deleted": true,
            "deletedAt": timestamp::format(&timestamp::now()),
        });

        let response = self.request(Method::PATCH, url).json(&patch).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(
                "[HttpDocumentStore] '{}' does not exist, nothing to delete",
                conversation_id
            );
            return Ok(());
        }
        Self::ensure_success(response, "PATCH document").await?;

        tracing::debug!("[HttpDocumentStore] Soft-deleted '{}'", conversation_id);
        Ok(())
    }
}
