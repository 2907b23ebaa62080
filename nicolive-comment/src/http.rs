//! HTTP transport for the entry, segment and packed-segment endpoints

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::error::{ClientError, Result};

pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Body of a streaming response, yielded chunk by chunk as it arrives.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Raw HTTP access used by the stream components.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Start a GET and return its body as a chunk stream.
    ///
    /// Resolves once response headers are in; a non-success status is an error.
    async fn open(&self, url: &str) -> Result<ByteStream>;

    /// GET a whole body, failing once it grows past `max_size` bytes.
    async fn fetch(&self, url: &str, max_size: usize) -> Result<Bytes>;
}

/// [`HttpFetcher`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    cookies: Option<String>,
}

impl ReqwestFetcher {
    pub fn new(cookies: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self { client, cookies })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let mut req = self.client.get(url);
        if let Some(cookies) = &self.cookies {
            req = req.header(reqwest::header::COOKIE, cookies);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn open(&self, url: &str) -> Result<ByteStream> {
        let response = self.send(url).await?;
        debug!(url = %url, status = %response.status(), "HTTP stream opened");

        let body = futures::stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(ClientError::from(e)), None)),
            }
        });

        Ok(body.boxed())
    }

    async fn fetch(&self, url: &str, max_size: usize) -> Result<Bytes> {
        let mut response = self.send(url).await?;

        if let Some(len) = response.content_length() {
            if len > max_size as u64 {
                return Err(ClientError::ResponseTooLarge {
                    size: len,
                    limit: max_size,
                });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > max_size {
                return Err(ClientError::ResponseTooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    limit: max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_open_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg/1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(None).unwrap();
        let mut stream = fetcher.open(&format!("{}/seg/1", server.uri())).await.unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(None).unwrap();
        let err = fetcher.open(&format!("{}/view", server.uri())).await.err().unwrap();
        assert!(matches!(err, ClientError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cookie", "user_session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"packed".to_vec()))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(Some("user_session=abc".to_string())).unwrap();
        let body = fetcher
            .fetch(&format!("{}/packed", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"packed");
    }

    #[tokio::test]
    async fn test_fetch_enforces_size_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(None).unwrap();
        let err = fetcher
            .fetch(&format!("{}/packed", server.uri()), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ResponseTooLarge { limit: 16, .. }));
    }
}
