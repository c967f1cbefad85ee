// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! REST transport for Elasticsearch/OpenSearch-compatible clusters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::transport::{AliasAction, BulkAction, ClusterTransport, TransportError};
use crate::error::SearchError;

/// Parsed host list sharing one set of credentials
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Base URLs with credentials stripped
    pub hosts: Vec<Url>,
    pub credentials: Option<(String, String)>,
}

impl HostConfig {
    /// Parse host URLs. Every host must carry the same credentials.
    pub fn parse(urls: &[String]) -> Result<Self, SearchError> {
        let mut hosts = Vec::with_capacity(urls.len());
        let mut credentials: Option<Option<(String, String)>> = None;

        for raw in urls {
            let mut url = Url::parse(raw)
                .map_err(|e| SearchError::Configuration(format!("invalid cluster URL {raw:?}: {e}")))?;

            let auth = match (url.username(), url.password()) {
                ("", None) => None,
                (user, password) => Some((user.to_string(), password.unwrap_or_default().to_string())),
            };
            match &credentials {
                None => credentials = Some(auth),
                Some(first) if *first != auth => {
                    return Err(SearchError::Configuration(
                        "multiple hosts with differing authentication credentials are not supported"
                            .to_string(),
                    ))
                }
                Some(_) => {}
            }

            // Credentials travel as a header, not in the URL
            url.set_username("")
                .and_then(|()| url.set_password(None))
                .map_err(|()| SearchError::Configuration(format!("cluster URL {raw:?} is not a host URL")))?;
            hosts.push(url);
        }

        if hosts.is_empty() {
            return Err(SearchError::Configuration("no cluster URLs configured".to_string()));
        }

        Ok(Self {
            hosts,
            credentials: credentials.flatten(),
        })
    }
}

/// `host` extended with `segments`, each percent-encoded as one path segment
pub fn endpoint(host: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|()| TransportError::Request(format!("{host} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Cluster transport over HTTP, round-robin across hosts
pub struct HttpTransport {
    client: Client,
    config: HostConfig,
    next_host: AtomicUsize,
}

impl HttpTransport {
    pub fn new(urls: &[String], timeout: Duration) -> Result<Self, SearchError> {
        let config = HostConfig::parse(urls)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            next_host: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn hosts(&self) -> &[Url] {
        &self.config.hosts
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, TransportError> {
        let idx = self.next_host.fetch_add(1, Ordering::Relaxed) % self.config.hosts.len();
        let url = endpoint(&self.config.hosts[idx], segments)?;
        debug!(%method, %url, "Cluster request");

        let builder = self.client.request(method, url);
        Ok(match &self.config.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<reqwest::Response, TransportError> {
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(resource.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json(&self, builder: RequestBuilder, resource: &str) -> Result<Value, TransportError> {
        self.send(builder, resource)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn exists(&self, segments: &[&str], resource: &str) -> Result<bool, TransportError> {
        match self.send(self.request(Method::HEAD, segments)?, resource).await {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ClusterTransport for HttpTransport {
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), TransportError> {
        self.send(self.request(Method::PUT, &[index])?.json(body), index).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), TransportError> {
        self.send(self.request(Method::DELETE, &[index])?, index).await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, TransportError> {
        self.exists(&[index], index).await
    }

    async fn refresh_index(&self, index: &str) -> Result<(), TransportError> {
        self.send(self.request(Method::POST, &[index, "_refresh"])?, index).await?;
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransportError> {
        self.send(self.request(Method::PUT, &[index, "_mapping"])?.json(mapping), index)
            .await?;
        Ok(())
    }

    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<(), TransportError> {
        self.send(self.request(Method::PUT, &[index, "_doc", id])?.json(document), index)
            .await?;
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<(), TransportError> {
        let mut body = String::new();
        for action in actions {
            body.push_str(&json!({"index": {"_id": action.id}}).to_string());
            body.push('\n');
            body.push_str(&action.document.to_string());
            body.push('\n');
        }
        let builder = self
            .request(Method::POST, &[index, "_bulk"])?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = self.send_json(builder, index).await?;

        if response.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(TransportError::Status {
                status: 200,
                body: response.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), TransportError> {
        let resource = format!("{index}/_doc/{id}");
        self.send(self.request(Method::DELETE, &[index, "_doc", id])?, &resource)
            .await?;
        Ok(())
    }

    async fn search(&self, index: &str, body: &Value, scroll: Option<&str>) -> Result<Value, TransportError> {
        let mut builder = self.request(Method::POST, &[index, "_search"])?.json(body);
        if let Some(keep_alive) = scroll {
            builder = builder.query(&[("scroll", keep_alive)]);
        }
        self.send_json(builder, index).await
    }

    async fn count(&self, index: &str, body: &Value) -> Result<u64, TransportError> {
        let response = self
            .send_json(self.request(Method::POST, &[index, "_count"])?.json(body), index)
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::Decode(format!("count missing in {response}")))
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<Value, TransportError> {
        let body = json!({"scroll": keep_alive, "scroll_id": scroll_id});
        self.send_json(self.request(Method::POST, &["_search", "scroll"])?.json(&body), scroll_id)
            .await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError> {
        let body = json!({"scroll_id": scroll_id});
        self.send(self.request(Method::DELETE, &["_search", "scroll"])?.json(&body), scroll_id)
            .await?;
        Ok(())
    }

    async fn alias_exists(&self, name: &str) -> Result<bool, TransportError> {
        self.exists(&["_alias", name], name).await
    }

    async fn get_alias(&self, name: &str) -> Result<Vec<String>, TransportError> {
        let response = self
            .send_json(self.request(Method::GET, &["_alias", name])?, name)
            .await?;
        Ok(response
            .as_object()
            .map(|indices| indices.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_alias(&self, index: &str, name: &str) -> Result<(), TransportError> {
        self.send(self.request(Method::PUT, &[index, "_alias", name])?, index)
            .await?;
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), TransportError> {
        let body = json!({ "actions": actions });
        self.send(self.request(Method::POST, &["_aliases"])?.json(&body), "_aliases")
            .await?;
        Ok(())
    }
}
