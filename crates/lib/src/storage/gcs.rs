//! Google Cloud Storage upload via the JSON API (simple media upload).

use crate::storage::{ObjectStore, StorageError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cloud Storage client. Uses a static bearer token when configured, otherwise asks the metadata server on each upload.
#[derive(Clone)]
pub struct GcsClient {
    base_url: String,
    metadata_url: String,
    static_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl GcsClient {
    pub fn new(
        base_url: Option<String>,
        metadata_url: String,
        static_token: Option<String>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            metadata_url,
            static_token,
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Bound each request (token fetch, upload) to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        if let Some(ref t) = self.static_token {
            return Ok(t.clone());
        }
        let res = self
            .client
            .get(&self.metadata_url)
            .timeout(self.timeout)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| StorageError::Token(format!("metadata server unreachable: {}", e)))?;
        if !res.status().is_success() {
            return Err(StorageError::Token(format!(
                "metadata server returned {}",
                res.status()
            )));
        }
        let token: MetadataToken = res.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    /// POST /upload/storage/v1/b/{bucket}/o?uploadType=media&name={key}
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let token = self.access_token().await?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, bucket);
        let size = bytes.len();
        let res = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .timeout(self.timeout)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(StorageError::Api(format!("upload failed: {} {}", status, body)));
        }
        log::info!("uploaded {} bytes to gs://{}/{}", size, bucket, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn upload_with_static_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload/storage/v1/b/tenant-bucket/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("name".into(), "U1/m1_20240101000000.jpg".into()),
            ]))
            .match_header("authorization", "Bearer static-token")
            .match_header("content-type", "image/jpeg")
            .match_body("bytes")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let client = GcsClient::new(
            Some(server.url()),
            format!("{}/token", server.url()),
            Some("static-token".to_string()),
        );
        client
            .upload("tenant-bucket", "U1/m1_20240101000000.jpg", b"bytes".to_vec(), "image/jpeg")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_fetches_metadata_token() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/token")
            .match_header("metadata-flavor", "Google")
            .with_status(200)
            .with_body(r#"{"access_token":"meta-token","expires_in":3599,"token_type":"Bearer"}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload/storage/v1/b/b/o")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer meta-token")
            .with_status(200)
            .create_async()
            .await;
        let client = GcsClient::new(Some(server.url()), format!("{}/token", server.url()), None);
        client.upload("b", "k", vec![1, 2, 3], "image/jpeg").await.unwrap();
        token.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn upload_error_status_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload/storage/v1/b/b/o")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;
        let client = GcsClient::new(Some(server.url()), String::new(), Some("t".to_string()));
        assert!(matches!(
            client.upload("b", "k", vec![], "image/jpeg").await,
            Err(StorageError::Api(_))
        ));
    }

    #[tokio::test]
    async fn hanging_metadata_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((sock, _)) = listener.accept().await {
                    held.push(sock);
                }
            }
        });
        let base = format!("http://{}", addr);
        let client = GcsClient::new(Some(base.clone()), format!("{}/token", base), None)
            .with_timeout(Duration::from_millis(200));
        assert!(matches!(
            client.upload("b", "k", vec![1], "image/jpeg").await,
            Err(StorageError::Token(_))
        ));
    }
}
