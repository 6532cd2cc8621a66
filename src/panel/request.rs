use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{header, Client};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use super::types::{client_identifier, ApiResponse, Inbound, PanelTarget};

const SUPPORTED_PROTOCOLS: [&str; 4] = ["vless", "vmess", "trojan", "shadowsocks"];

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("panel rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected panel response: {0}")]
    Decode(String),
}

/// Typed calls against one panel. The engine and the drift loop only see
/// this trait; the HTTP implementation below is swapped for a fake in tests.
#[async_trait]
pub trait PanelClient: Send + Sync {
    async fn login(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<String, PanelError>;

    async fn inbounds(&self, target: &PanelTarget) -> Result<Vec<Inbound>, PanelError>;

    async fn create_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
    ) -> Result<(), PanelError>;

    async fn set_client_enabled(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
        enabled: bool,
    ) -> Result<(), PanelError>;

    async fn replace_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        old_key: &str,
        new_key: &str,
        enabled: bool,
    ) -> Result<(), PanelError>;

    async fn remove_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
    ) -> Result<(), PanelError>;

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>, PanelError>;
}

pub struct XuiClient {
    http: Client,
}

impl XuiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    fn api_url(target: &PanelTarget, path: &str) -> String {
        format!("{}{}", target.host.trim_end_matches('/'), path)
    }

    async fn post_api(
        &self,
        target: &PanelTarget,
        path: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<(), PanelError> {
        let url = Self::api_url(target, path);
        let mut request = self
            .http
            .post(&url)
            .header(header::COOKIE, &target.session);
        if let Some(body) = payload {
            request = request.json(&body);
        }

        let response = request.send().await?.error_for_status()?;
        let envelope: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PanelError::Decode(e.to_string()))?;

        if !envelope.success {
            warn!(url = %url, msg = %envelope.msg, "panel refused mutation");
            return Err(PanelError::Rejected(envelope.msg));
        }
        Ok(())
    }

    fn client_settings(identifier: &str, sub_id: &str, enabled: bool) -> serde_json::Value {
        json!({
            "clients": [{
                "id": identifier,
                "email": identifier,
                "password": identifier,
                "subId": sub_id,
                "expiryTime": 0,
                "totalGB": 0,
                "enable": enabled,
            }]
        })
    }
}

impl Default for XuiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PanelClient for XuiClient {
    async fn login(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<String, PanelError> {
        let url = format!("{}/login", host.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?
            .error_for_status()?;

        let session = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");

        if session.is_empty() {
            return Err(PanelError::Rejected(
                "login response carried no session cookie".to_string(),
            ));
        }
        Ok(session)
    }

    async fn inbounds(&self, target: &PanelTarget) -> Result<Vec<Inbound>, PanelError> {
        let url = Self::api_url(target, "/panel/api/inbounds/list");
        let response = self
            .http
            .get(&url)
            .header(header::COOKIE, &target.session)
            .send()
            .await?
            .error_for_status()?;

        let envelope: ApiResponse<Vec<Inbound>> = response
            .json()
            .await
            .map_err(|e| PanelError::Decode(e.to_string()))?;

        if !envelope.success {
            return Err(PanelError::Rejected(envelope.msg));
        }

        Ok(envelope
            .obj
            .unwrap_or_default()
            .into_iter()
            .filter(|inbound| SUPPORTED_PROTOCOLS.contains(&inbound.protocol.as_str()))
            .collect())
    }

    async fn create_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
    ) -> Result<(), PanelError> {
        let identifier = client_identifier(inbound_id, key);
        let payload = json!({
            "id": inbound_id,
            "settings": Self::client_settings(&identifier, key, true).to_string(),
        });
        self.post_api(target, "/panel/api/inbounds/addClient", Some(payload))
            .await
    }

    async fn set_client_enabled(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
        enabled: bool,
    ) -> Result<(), PanelError> {
        let identifier = client_identifier(inbound_id, key);
        let payload = json!({
            "id": inbound_id,
            "settings": Self::client_settings(&identifier, key, enabled).to_string(),
        });
        self.post_api(
            target,
            &format!("/panel/api/inbounds/updateClient/{identifier}"),
            Some(payload),
        )
        .await
    }

    async fn replace_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        old_key: &str,
        new_key: &str,
        enabled: bool,
    ) -> Result<(), PanelError> {
        // The update is addressed at the existing identifier and writes the
        // replacement identity over it.
        let old_identifier = client_identifier(inbound_id, old_key);
        let new_identifier = client_identifier(inbound_id, new_key);
        let payload = json!({
            "id": inbound_id,
            "settings": Self::client_settings(&new_identifier, new_key, enabled).to_string(),
        });
        self.post_api(
            target,
            &format!("/panel/api/inbounds/updateClient/{old_identifier}"),
            Some(payload),
        )
        .await
    }

    async fn remove_client(
        &self,
        target: &PanelTarget,
        inbound_id: i64,
        key: &str,
    ) -> Result<(), PanelError> {
        let identifier = client_identifier(inbound_id, key);
        self.post_api(
            target,
            &format!("/panel/api/inbounds/{inbound_id}/delClient/{identifier}"),
            None,
        )
        .await
    }

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>, PanelError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let raw = response.bytes().await?;
        let body = String::from_utf8_lossy(&raw).into_owned();

        // Link lists are served base64-encoded by most panels, plain text
        // by some.
        let text = match BASE64.decode(body.trim().as_bytes()) {
            Ok(decoded) => String::from_utf8(decoded).unwrap_or(body),
            Err(_) => body,
        };

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
