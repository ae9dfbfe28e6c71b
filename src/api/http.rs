//! reqwest implementation of [`ControlApi`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    CommandReply, ConfigPayload, ControlApi, DownloadAllRequest, DownloadJobStatus,
    DownloadSelectedRequest, FleetSnapshot, HealthResponse, LogsResponse, SaveDocumentRequest,
    SaveFieldRequest,
};
use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use crate::ids::ProcessId;

const USER_AGENT: &str = concat!("fleet-console/", env!("CARGO_PKG_VERSION"));

/// Control API reached over HTTP at a configured base URL.
#[derive(Debug, Clone)]
pub struct HttpControlApi {
    client: Client,
    base: Url,
}

impl HttpControlApi {
    pub fn new(client: Client, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::config(format!("Invalid API url {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(AppError::config(format!("Invalid API url {}", base_url)));
        }
        Ok(Self { client, base })
    }

    /// Build a client from the console configuration.
    ///
    /// Requests carry no timeout unless `request_timeout_secs` is set.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::config(format!("Failed to create HTTP client: {}", e)))?;
        Self::new(client, &config.api_url)
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| AppError::config(format!("Invalid API url {}", self.base)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::network_with_url(url.as_str(), e.to_string()))?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_empty(&self, url: Url) -> Result<()> {
        let req = self.client.post(url.clone());
        send_command(req, &url).await
    }

    async fn post_json<B>(&self, url: Url, body: &B) -> Result<()>
    where
        B: Serialize + Sync + ?Sized,
    {
        let req = self.client.post(url.clone()).json(body);
        send_command(req, &url).await
    }
}

async fn send_command(req: RequestBuilder, url: &Url) -> Result<()> {
    let resp = req
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url.as_str(), e.to_string()))?;
    ensure_success(resp).await?;
    Ok(())
}

/// Turn a non-success status into `Rejected`, preferring the server's `error` message.
async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = match resp.json::<CommandReply>().await {
        Ok(CommandReply {
            error: Some(message),
        }) if !message.is_empty() => message,
        _ => status.to_string(),
    };
    Err(AppError::rejected(status.as_u16(), detail))
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["api", "health"])?;
        let health: HealthResponse = self.get_json(url).await?;
        if health.status == "ok" {
            Ok(())
        } else {
            Err(AppError::other(format!(
                "Control API reported status {}",
                health.status
            )))
        }
    }

    async fn fetch_fleet(&self) -> Result<FleetSnapshot> {
        let url = self.endpoint(&["api", "servers"])?;
        self.get_json(url).await
    }

    async fn fetch_download_status(&self) -> Result<DownloadJobStatus> {
        let url = self.endpoint(&["api", "download", "status"])?;
        self.get_json(url).await
    }

    async fn download_all(&self, force: bool) -> Result<()> {
        let url = self.endpoint(&["api", "download", "all"])?;
        self.post_json(url, &DownloadAllRequest { force }).await
    }

    async fn download_selected(&self, selected: &[ProcessId], force: bool) -> Result<()> {
        let url = self.endpoint(&["api", "download"])?;
        self.post_json(url, &DownloadSelectedRequest { force, selected })
            .await
    }

    async fn start(&self, id: &ProcessId) -> Result<()> {
        let url = self.endpoint(&["api", "servers", id.as_str(), "start"])?;
        self.post_empty(url).await
    }

    async fn stop(&self, id: &ProcessId) -> Result<()> {
        let url = self.endpoint(&["api", "servers", id.as_str(), "stop"])?;
        self.post_empty(url).await
    }

    async fn remove(&self, id: &ProcessId) -> Result<()> {
        let url = self.endpoint(&["api", "servers", id.as_str(), "remove"])?;
        self.post_empty(url).await
    }

    async fn fetch_logs(&self, id: &ProcessId, lines: u32) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["api", "servers", id.as_str(), "logs"])?;
        url.query_pairs_mut()
            .append_pair("lines", &lines.to_string())
            .append_pair("tail", "true");
        let resp: LogsResponse = self.get_json(url).await?;
        Ok(resp.logs)
    }

    async fn fetch_config(&self, name: &str) -> Result<ConfigPayload> {
        let url = self.endpoint(&["api", "config", name])?;
        self.get_json(url).await
    }

    async fn save_config(&self, name: &str, content: serde_json::Value) -> Result<()> {
        let url = self.endpoint(&["api", "config", name])?;
        self.post_json(url, &SaveDocumentRequest { content }).await
    }

    async fn save_config_field(
        &self,
        name: &str,
        field_path: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let url = self.endpoint(&["api", "config", name])?;
        self.post_json(
            url,
            &SaveFieldRequest {
                content: value,
                field_path,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpControlApi {
        HttpControlApi::new(Client::new(), base).unwrap()
    }

    #[test]
    fn endpoints_join_onto_base_path() {
        let url = api("http://localhost:5000").endpoint(&["api", "servers"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/servers");

        let url = api("http://fleet.lan/console/")
            .endpoint(&["api", "config", "settings.yml"])
            .unwrap();
        assert_eq!(url.as_str(), "http://fleet.lan/console/api/config/settings.yml");
    }

    #[test]
    fn endpoint_segments_are_encoded() {
        let url = api("http://localhost:5000")
            .endpoint(&["api", "servers", "odd/id", "start"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/servers/odd%2Fid/start");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(HttpControlApi::new(Client::new(), "not a url").is_err());
        assert!(HttpControlApi::new(Client::new(), "mailto:ops@example.com").is_err());
    }
}
