//! HTTP remote mirror
//!
//! Talks to a PostgREST-style table endpoint:
//! - `GET    {url}/rest/v1/{table}?child_device_id=eq.{device}`
//! - `POST   {url}/rest/v1/{table}?on_conflict=child_device_id,application_token`
//! - `DELETE {url}/rest/v1/{table}?child_device_id=eq.{device}&application_token=eq.{token}`

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use shield_api::RemoteRecord;
use shield_config::MirrorConfig;
use shield_host_api::{MirrorError, MirrorResult, RemoteMirror};
use shield_util::{AppToken, DeviceId};
use tracing::debug;

/// Remote mirror reached over HTTP
pub struct HttpMirror {
    client: Client,
    table_url: String,
    api_key: Option<String>,
}

impl HttpMirror {
    pub fn new(config: &MirrorConfig) -> MirrorResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| MirrorError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", config.url, config.table),
            api_key: config.api_key.clone(),
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> MirrorResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(MirrorError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

fn map_request_error(e: reqwest::Error) -> MirrorError {
    if e.is_timeout() {
        MirrorError::Timeout
    } else {
        MirrorError::Network(e.to_string())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteMirror for HttpMirror {
    async fn fetch(&self, device: &DeviceId) -> MirrorResult<Vec<RemoteRecord>> {
        debug!(url = %self.table_url, device = %device, "Fetching remote rows");

        let request = self
            .client
            .get(&self.table_url)
            .query(&[("child_device_id", eq(device)), ("select", "*".into())]);
        let response = self.send(request).await?;

        let rows: Vec<RemoteRecord> = response
            .json()
            .await
            .map_err(|e| MirrorError::Decode(e.to_string()))?;
        debug!(device = %device, rows = rows.len(), "Remote rows fetched");
        Ok(rows)
    }

    async fn upsert(&self, record: &RemoteRecord) -> MirrorResult<()> {
        debug!(
            device = %record.child_device_id,
            token = %record.application_token,
            is_shielded = record.is_shielded,
            "Upserting remote row"
        );

        let request = self
            .client
            .post(&self.table_url)
            .query(&[("on_conflict", "child_device_id,application_token")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record]);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, device: &DeviceId, token: &AppToken) -> MirrorResult<()> {
        debug!(device = %device, token = %token, "Deleting remote row");

        let request = self.client.delete(&self.table_url).query(&[
            ("child_device_id", eq(device)),
            ("application_token", eq(token)),
        ]);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(url: &str) -> MirrorConfig {
        MirrorConfig {
            url: url.into(),
            api_key: Some("secret".into()),
            table: "shielded_apps".into(),
            timeout: Duration::from_secs(2),
            sync_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn table_url_is_built_from_config() {
        let mirror = HttpMirror::new(&config("https://mirror.example.com")).unwrap();
        assert_eq!(
            mirror.table_url(),
            "https://mirror.example.com/rest/v1/shielded_apps"
        );
    }

    #[test]
    fn filters_use_eq_operator() {
        assert_eq!(eq(DeviceId::new("child-1")), "eq.child-1");
        assert_eq!(eq(AppToken::from_bytes(vec![0xab])), "eq.ab");
    }

    #[tokio::test]
    async fn unreachable_mirror_is_a_network_error() {
        // Port 1 on loopback refuses connections
        let mirror = HttpMirror::new(&config("http://127.0.0.1:1")).unwrap();
        let result = mirror.fetch(&DeviceId::new("child")).await;
        assert!(matches!(
            result,
            Err(MirrorError::Network(_)) | Err(MirrorError::Timeout)
        ));
    }
}
