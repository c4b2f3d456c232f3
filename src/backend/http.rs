//! reqwest-based implementations of [`DataBackend`] and [`BlobStore`].
//!
//! Row operations speak the backend's REST dialect: filters go in the query
//! string (`eq.`, `in.`, `cs.` operators) and writes ask for
//! `return=representation` so the stored row comes back in one round trip.
//! Realtime subscriptions are long-lived NDJSON streams that reconnect on
//! any failure.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use super::{
    BlobStore, DataBackend, Filter, MessageUpdate, NewBlock, NewChat, NewMessage, NewNotification,
    NotificationUpdate,
};
use crate::error::{BaraholkaError, Result};
use crate::services::config::BackendSettings;
use crate::services::types::{BlockEdge, ChangeEvent, Chat, Message, Notification, TypingPing};

const STREAM_BUFFER: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// REST + realtime client for the hosted backend.
pub struct HttpBackend {
    client: reqwest::Client,
    /// Separate client without a total-request timeout; subscription
    /// responses never finish.
    stream_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        // Url::join treats the last path segment as a file without this.
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| BaraholkaError::BackendError(format!("Invalid backend URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BaraholkaError::BackendError(format!("HTTP client init: {}", e)))?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BaraholkaError::BackendError(format!("HTTP client init: {}", e)))?;
        Ok(Self {
            client,
            stream_client,
            base_url,
            api_key: settings.api_key.clone(),
        })
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn table_url(&self, table: &str, filters: &[Filter]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| BaraholkaError::BackendError(format!("URL for {}: {}", table, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                match filter {
                    Filter::Eq(column, value) => {
                        pairs.append_pair(column, &format!("eq.{}", value));
                    }
                    Filter::In(column, values) => {
                        pairs.append_pair(column, &format!("in.({})", values.join(",")));
                    }
                    Filter::Contains(column, values) => {
                        pairs.append_pair(column, &format!("cs.{{{}}}", values.join(",")));
                    }
                }
            }
        }
        Ok(url)
    }

    fn realtime_url(&self, channel: &str) -> Result<Url> {
        self.base_url
            .join(&format!("realtime/v1/{}", channel))
            .map_err(|e| BaraholkaError::BackendError(format!("URL for {}: {}", channel, e)))
    }

    async fn fail(context: &str, response: reqwest::Response) -> BaraholkaError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        BaraholkaError::BackendError(format!("{}: HTTP {} {}", context, status, body))
    }

    async fn insert_row<B, T>(&self, table: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.table_url(table, &[])?;
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Insert into {}: {}", table, e)))?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("Insert into {}", table), response).await);
        }
        let rows: Vec<T> = response
            .json()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Parse {} row: {}", table, e)))?;
        rows.into_iter().next().ok_or_else(|| {
            BaraholkaError::BackendError(format!("Insert into {} returned no row", table))
        })
    }

    async fn query_rows<T>(&self, table: &str, filters: &[Filter]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.table_url(table, filters)?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Query {}: {}", table, e)))?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("Query {}", table), response).await);
        }
        response
            .json()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Parse {} rows: {}", table, e)))
    }

    async fn update_rows<B, T>(&self, table: &str, filters: &[Filter], body: &B) -> Result<Vec<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.table_url(table, filters)?;
        let response = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Update {}: {}", table, e)))?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("Update {}", table), response).await);
        }
        response
            .json()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Parse {} rows: {}", table, e)))
    }

    async fn delete_rows(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let url = self.table_url(table, filters)?;
        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Delete from {}: {}", table, e)))?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("Delete from {}", table), response).await);
        }
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Parse {} rows: {}", table, e)))?;
        Ok(rows.len() as u64)
    }

    /// Spawn a reconnecting NDJSON reader pushing parsed items into a
    /// channel. The task exits once the receiver is dropped.
    fn spawn_ndjson_stream<T>(&self, url: Url, label: &'static str) -> mpsc::Receiver<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let client = self.stream_client.clone();
        let api_key = self.api_key.clone();
        tokio::spawn(async move {
            loop {
                let request = client
                    .get(url.clone())
                    .header("apikey", &api_key)
                    .header("Authorization", format!("Bearer {}", api_key));
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        log::info!("{} stream connected", label);
                        let mut stream = response.bytes_stream();
                        let mut buffer: Vec<u8> = Vec::new();
                        while let Some(chunk) = stream.next().await {
                            let chunk = match chunk {
                                Ok(chunk) => chunk,
                                Err(e) => {
                                    log::warn!("{} stream broke: {}", label, e);
                                    break;
                                }
                            };
                            buffer.extend_from_slice(&chunk);
                            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                                let line: Vec<u8> = buffer.drain(..=pos).collect();
                                let line = String::from_utf8_lossy(&line);
                                let line = line.trim();
                                if line.is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<T>(line) {
                                    Ok(item) => {
                                        if tx.send(item).await.is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("{} stream skipped malformed line: {}", label, e)
                                    }
                                }
                            }
                        }
                    }
                    Ok(response) => {
                        log::warn!("{} stream rejected: HTTP {}", label, response.status())
                    }
                    Err(e) => log::warn!("{} stream connect failed: {}", label, e),
                }
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
        rx
    }
}

#[async_trait]
impl DataBackend for HttpBackend {
    async fn insert_chat(&self, new: NewChat) -> Result<Chat> {
        self.insert_row("chats", &new).await
    }

    async fn query_chats(&self, filters: &[Filter]) -> Result<Vec<Chat>> {
        self.query_rows("chats", filters).await
    }

    async fn delete_chat(&self, id: &str) -> Result<u64> {
        self.delete_rows("chats", &[Filter::Eq("id", id.to_string())])
            .await
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let url = self.table_url("messages", &[])?;
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&new)
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Insert message: {}", e)))?;
        // Policy refusal: the recipient has blocked the sender.
        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(BaraholkaError::RecipientBlocked);
        }
        if !response.status().is_success() {
            return Err(Self::fail("Insert message", response).await);
        }
        let rows: Vec<Message> = response
            .json()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Parse message row: {}", e)))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BaraholkaError::BackendError("Insert message returned no row".into()))
    }

    async fn query_messages(&self, filters: &[Filter]) -> Result<Vec<Message>> {
        self.query_rows("messages", filters).await
    }

    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<Message> {
        let rows: Vec<Message> = self
            .update_rows("messages", &[Filter::Eq("id", id.to_string())], &update)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BaraholkaError::NotFound(format!("message {}", id)))
    }

    async fn insert_notification(&self, new: NewNotification) -> Result<Notification> {
        self.insert_row("notifications", &new).await
    }

    async fn query_notifications(&self, filters: &[Filter]) -> Result<Vec<Notification>> {
        self.query_rows("notifications", filters).await
    }

    async fn update_notifications(
        &self,
        filters: &[Filter],
        update: NotificationUpdate,
    ) -> Result<Vec<Notification>> {
        self.update_rows("notifications", filters, &update).await
    }

    async fn delete_notifications(&self, filters: &[Filter]) -> Result<u64> {
        self.delete_rows("notifications", filters).await
    }

    async fn insert_block(&self, new: NewBlock) -> Result<BlockEdge> {
        self.insert_row("blocks", &new).await
    }

    async fn query_blocks(&self, filters: &[Filter]) -> Result<Vec<BlockEdge>> {
        self.query_rows("blocks", filters).await
    }

    async fn delete_blocks(&self, filters: &[Filter]) -> Result<u64> {
        self.delete_rows("blocks", filters).await
    }

    async fn subscribe_changes(&self, user_id: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        let mut url = self.realtime_url("changes")?;
        url.query_pairs_mut().append_pair("userId", user_id);
        Ok(self.spawn_ndjson_stream(url, "Change feed"))
    }

    async fn broadcast_typing(&self, ping: TypingPing) -> Result<()> {
        let url = self.realtime_url("typing")?;
        let response = self
            .request(Method::POST, url)
            .json(&ping)
            .send()
            .await
            .map_err(|e| BaraholkaError::BackendError(format!("Typing broadcast: {}", e)))?;
        if !response.status().is_success() {
            return Err(Self::fail("Typing broadcast", response).await);
        }
        Ok(())
    }

    async fn subscribe_typing(&self) -> Result<mpsc::Receiver<TypingPing>> {
        let url = self.realtime_url("typing")?;
        Ok(self.spawn_ndjson_stream(url, "Typing feed"))
    }
}

/// Blob storage client for attachments.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpBlobStore {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| BaraholkaError::BackendError(format!("Invalid backend URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BaraholkaError::BackendError(format!("HTTP client init: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment.bin")
            .to_string();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BaraholkaError::StorageError(format!("Read {}: {}", path.display(), e)))?;
        log::info!(
            "Uploading attachment {} ({} bytes, {})",
            file_name,
            bytes.len(),
            mime
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime.as_ref())
            .map_err(|e| BaraholkaError::AttachmentUploadError(format!("{}: {}", file_name, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self
            .base_url
            .join("storage/v1/attachments")
            .map_err(|e| BaraholkaError::AttachmentUploadError(e.to_string()))?;
        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| BaraholkaError::AttachmentUploadError(format!("{}: {}", file_name, e)))?;
        if !response.status().is_success() {
            return Err(BaraholkaError::AttachmentUploadError(format!(
                "{}: HTTP {}",
                file_name,
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct UploadResponse {
            url: String,
        }
        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| BaraholkaError::AttachmentUploadError(format!("{}: {}", file_name, e)))?;
        Ok(upload.url)
    }
}
