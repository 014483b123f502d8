use crate::config::{ClientConfig, ConfigError};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("не удалось подключиться к {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("сервер ответил {status} ({kind}): {message}")]
    Api {
        status: StatusCode,
        kind: String,
        message: String,
    },
    #[error("некорректный ответ сервера: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    pub fn from_config(cfg: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(&cfg.base_url, cfg.timeout()?)
    }

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(concat!("hostscan/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Connect {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        self.json(Method::GET, "/api/health", None).await
    }

    pub async fn scan(
        &self,
        name: Option<&str>,
        scan_type: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut body = json!({});
        if let Some(name) = name {
            body["name"] = json!(name);
        }
        if let Some(scan_type) = scan_type {
            body["scan_type"] = json!(scan_type);
        }
        self.json(Method::POST, "/api/scan", Some(body)).await
    }

    pub async fn get(&self, id: &str) -> Result<Value, ClientError> {
        self.json(Method::GET, &format!("/api/scan/{id}"), None).await
    }

    pub async fn summary(&self, id: &str) -> Result<Value, ClientError> {
        self.json(Method::GET, &format!("/api/results/summary/{id}"), None)
            .await
    }

    pub async fn list(&self, limit: Option<usize>) -> Result<Value, ClientError> {
        let path = match limit {
            Some(limit) => format!("/api/results?limit={limit}"),
            None => "/api/results".to_string(),
        };
        self.json(Method::GET, &path, None).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ClientError> {
        let body = self
            .json(Method::DELETE, &format!("/api/results/{id}"), None)
            .await?;
        Ok(body["deleted"].as_bool().unwrap_or(false))
    }

    pub async fn statistics(&self) -> Result<Value, ClientError> {
        self.json(Method::GET, "/api/statistics", None).await
    }

    pub async fn apis(&self) -> Result<Value, ClientError> {
        self.json(Method::GET, "/api/apis", None).await
    }

    pub async fn download(&self, id: &str) -> Result<(Option<String>, Vec<u8>), ClientError> {
        let response = self
            .send(Method::GET, &format!("/api/download/{id}"), None)
            .await?;
        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename);
        let bytes = response.bytes().await.map_err(ClientError::Decode)?;
        Ok((filename, bytes.to_vec()))
    }

    async fn json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let response = self.send(method, path, body).await?;
        response.json().await.map_err(ClientError::Decode)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, ClientError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "запрос к удалённому серверу");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Connect { url, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&text).ok();
        Err(ClientError::Api {
            status,
            kind: parsed
                .as_ref()
                .and_then(|b| b.kind.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            message: parsed.and_then(|b| b.message).unwrap_or(text),
        })
    }
}

fn attachment_filename(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let raw = rest.split(';').next()?.trim().trim_matches('"');
    // Только последний компонент: путь от сервера не должен выводить за пределы cwd.
    let name = raw.rsplit(['/', '\\']).next()?;
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}
