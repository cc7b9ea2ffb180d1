use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::DavError;
use crate::models::{DirectoryListing, FileInfo};
use crate::webdav_xml_parser::{is_same_resource, parse_http_date, parse_propfind_response};
use super::config::{RetryConfig, WebDAVConfig};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
            <D:propfind xmlns:D="DAV:">
                <D:prop>
                    <D:displayname/>
                    <D:getcontentlength/>
                    <D:getlastmodified/>
                    <D:getcontenttype/>
                    <D:getetag/>
                    <D:resourcetype/>
                </D:prop>
            </D:propfind>"#;

/// The remote primitives the atomic writer is built on.
///
/// Implementations must be safe to share between concurrent operations; the
/// writer never serialises calls itself.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Lists the direct children of a container, excluding the container itself.
    /// `NotFound` when the container does not exist.
    async fn list(&self, container: &Url) -> Result<DirectoryListing, DavError>;

    /// Creates one container. `AlreadyExists` if something is already there,
    /// `NotFound` if its parent is missing.
    async fn create_container(&self, url: &Url) -> Result<(), DavError>;

    /// Stores `data` at `url`, replacing any previous content.
    /// `NotFound` if the parent container is missing.
    async fn put(&self, data: Bytes, url: &Url) -> Result<(), DavError>;

    async fn get(&self, url: &Url) -> Result<Bytes, DavError>;

    /// Moves `source` to `destination` and returns where the resource ended up.
    /// Without `overwrite`, an existing destination yields `Conflict` and is
    /// left untouched.
    async fn move_resource(
        &self,
        source: &Url,
        destination: &Url,
        overwrite: bool,
    ) -> Result<Url, DavError>;

    async fn delete(&self, url: &Url) -> Result<(), DavError>;

    async fn stat(&self, url: &Url) -> Result<FileInfo, DavError>;
}

/// `RemoteConnection` over HTTP, speaking WebDAV to a real server
#[derive(Clone)]
pub struct WebDAVConnection {
    client: Client,
    config: WebDAVConfig,
    retry_config: RetryConfig,
}

impl WebDAVConnection {
    pub fn new(config: WebDAVConfig, retry_config: RetryConfig) -> anyhow::Result<Self> {
        // Validate configuration first
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            retry_config,
        })
    }

    pub fn config(&self) -> &WebDAVConfig {
        &self.config
    }

    /// The account's base URL as a container URL
    pub fn base_url(&self) -> Result<Url, DavError> {
        let raw = format!("{}/", self.config.webdav_url().trim_end_matches('/'));
        Url::parse(&raw).map_err(|e| DavError::invalid_url(raw.clone(), e.to_string()))
    }

    /// Resolves an account-relative path such as `/Docs/report.txt`
    pub fn url_for_path(&self, path: &str) -> Result<Url, DavError> {
        let base = self.base_url()?;
        let clean_path = path.trim_start_matches('/');
        if clean_path.is_empty() {
            return Ok(base);
        }
        base.join(clean_path)
            .map_err(|e| DavError::invalid_url(path, e.to_string()))
    }

    fn map_transport_error(&self, url: &Url, err: reqwest::Error) -> DavError {
        if err.is_timeout() {
            DavError::NetworkTimeout {
                url: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            }
        } else {
            DavError::from(err)
        }
    }

    /// Sends a request, retrying transport failures and 5xx responses when the
    /// method is idempotent. Any other status is handed back to the caller for
    /// mapping.
    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<Bytes>,
        headers: &[(&str, String)],
        idempotent: bool,
    ) -> Result<Response, DavError> {
        let max_retries = if idempotent { self.retry_config.max_retries } else { 0 };
        let mut attempt = 0;
        let mut delay = self.retry_config.initial_delay_ms;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&self.config.username, Some(&self.config.password));

            if let Some(ref body_content) = body {
                request = request.body(body_content.clone());
            }

            for (key, value) in headers {
                request = request.header(*key, value.as_str());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    // Handle rate limiting
                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < max_retries {
                        warn!("Rate limited, backing off for {}ms", self.retry_config.rate_limit_backoff_ms);
                        sleep(Duration::from_millis(self.retry_config.rate_limit_backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }

                    if status.is_server_error() && attempt < max_retries {
                        warn!("Server error {} for {} {}, retrying in {}ms (attempt {}/{})",
                            status, method, url, delay, attempt + 1, max_retries);

                        sleep(Duration::from_millis(delay)).await;
                        delay = std::cmp::min(
                            (delay as f64 * self.retry_config.backoff_multiplier) as u64,
                            self.retry_config.max_delay_ms,
                        );
                        attempt += 1;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if attempt < max_retries {
                        warn!("Request error: {}, retrying in {}ms (attempt {}/{})",
                            e, delay, attempt + 1, max_retries);

                        sleep(Duration::from_millis(delay)).await;
                        delay = std::cmp::min(
                            (delay as f64 * self.retry_config.backoff_multiplier) as u64,
                            self.retry_config.max_delay_ms,
                        );
                        attempt += 1;
                        continue;
                    }

                    return Err(self.map_transport_error(url, e));
                }
            }
        }
    }

    /// Returns the parsed entries plus the raw `Date` header of the response
    async fn propfind(&self, url: &Url, depth: &str) -> Result<(Vec<FileInfo>, Option<String>), DavError> {
        let response = self
            .send(
                method(b"PROPFIND")?,
                url,
                Some(Bytes::from_static(PROPFIND_BODY.as_bytes())),
                &[
                    ("Depth", depth.to_string()),
                    ("Content-Type", "application/xml".to_string()),
                ],
                true,
            )
            .await?;

        match response.status() {
            StatusCode::MULTI_STATUS => {}
            StatusCode::NOT_FOUND => return Err(DavError::not_found(url.as_str())),
            _ => return Err(unexpected_status(url, response).await),
        }

        // The Date header has to be read before the body consumes the response
        let date_header = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(url, e))?;
        let files = parse_propfind_response(&body)?;

        Ok((files, date_header))
    }
}

/// Maps a status the caller did not expect onto the error taxonomy
async fn unexpected_status(url: &Url, response: Response) -> DavError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DavError::AuthenticationFailed {
            url: url.to_string(),
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => DavError::not_found(url.as_str()),
        _ => DavError::ServerError {
            url: url.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}

fn method(name: &'static [u8]) -> Result<Method, DavError> {
    Method::from_bytes(name).map_err(|e| DavError::Connection {
        details: format!("Invalid HTTP method: {}", e),
    })
}

#[async_trait]
impl RemoteConnection for WebDAVConnection {
    async fn list(&self, container: &Url) -> Result<DirectoryListing, DavError> {
        debug!("📋 Listing container: {}", container);

        let (files, date_header) = self.propfind(container, "1").await?;

        let server_date = match date_header.as_deref().and_then(parse_http_date) {
            Some(date) => date,
            None => {
                warn!("Server sent no usable Date header for {}, using local clock", container);
                Utc::now()
            }
        };

        let (own, files): (Vec<FileInfo>, Vec<FileInfo>) = files
            .into_iter()
            .partition(|f| is_same_resource(&f.path, container.path()));

        if own.iter().any(|f| !f.is_directory) {
            return Err(DavError::conflict(container.as_str(), "a file exists at this path"));
        }

        debug!("✅ Listed {} entries in {}", files.len(), container);
        Ok(DirectoryListing { files, server_date })
    }

    async fn create_container(&self, url: &Url) -> Result<(), DavError> {
        debug!("📁 Creating container: {}", url);

        let response = self.send(method(b"MKCOL")?, url, None, &[], true).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                info!("📁 Created container: {}", url);
                Ok(())
            }
            StatusCode::METHOD_NOT_ALLOWED => Err(DavError::already_exists(url.as_str())),
            StatusCode::CONFLICT => Err(DavError::not_found(url.as_str())),
            _ => Err(unexpected_status(url, response).await),
        }
    }

    async fn put(&self, data: Bytes, url: &Url) -> Result<(), DavError> {
        debug!("⬆️ Uploading {} bytes to {}", data.len(), url);

        let response = self
            .send(
                Method::PUT,
                url,
                Some(data),
                &[("Content-Type", "application/octet-stream".to_string())],
                true,
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::CONFLICT => Err(DavError::not_found(url.as_str())),
            _ => Err(unexpected_status(url, response).await),
        }
    }

    async fn get(&self, url: &Url) -> Result<Bytes, DavError> {
        debug!("⬇️ Downloading {}", url);

        let response = self.send(Method::GET, url, None, &[], true).await?;

        if !response.status().is_success() {
            return Err(unexpected_status(url, response).await);
        }

        response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(url, e))
    }

    async fn move_resource(
        &self,
        source: &Url,
        destination: &Url,
        overwrite: bool,
    ) -> Result<Url, DavError> {
        debug!("🔀 Moving {} -> {} (overwrite: {})", source, destination, overwrite);

        // MOVE is not idempotent: a retry after a lost response would report
        // the source as missing even though the move succeeded.
        let response = self
            .send(
                method(b"MOVE")?,
                source,
                None,
                &[
                    ("Destination", destination.to_string()),
                    ("Overwrite", if overwrite { "T" } else { "F" }.to_string()),
                ],
                false,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => {
                let final_url = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| destination.join(loc).ok())
                    .unwrap_or_else(|| destination.clone());
                Ok(final_url)
            }
            StatusCode::PRECONDITION_FAILED => Err(DavError::conflict(
                destination.as_str(),
                "destination already exists",
            )),
            StatusCode::CONFLICT => Err(DavError::not_found(destination.as_str())),
            StatusCode::NOT_FOUND => Err(DavError::not_found(source.as_str())),
            _ => Err(unexpected_status(source, response).await),
        }
    }

    async fn delete(&self, url: &Url) -> Result<(), DavError> {
        debug!("🗑️ Deleting {}", url);

        let response = self.send(Method::DELETE, url, None, &[], true).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::ACCEPTED => Ok(()),
            StatusCode::NOT_FOUND => Err(DavError::not_found(url.as_str())),
            _ => Err(unexpected_status(url, response).await),
        }
    }

    async fn stat(&self, url: &Url) -> Result<FileInfo, DavError> {
        let (files, _) = self.propfind(url, "0").await?;

        files
            .into_iter()
            .find(|f| is_same_resource(&f.path, url.path()))
            .ok_or_else(|| DavError::InvalidResponse {
                details: format!("PROPFIND for {} did not describe the resource", url),
            })
    }
}
