//! DevTools HTTP discovery endpoints.
//!
//! A debuggable browser serves a small HTTP API next to its WebSocket:
//! `/json/version` describes the build, `/json/list` enumerates targets,
//! `PUT /json/new` opens a tab and `/json/close/{id}` closes one.

use std::time::Duration;

use {
    serde::Deserialize,
    tokio::time::{Instant, sleep},
    tracing::debug,
};

use tiller_protocol::{Error, Result};

/// Poll interval while waiting for the endpoint to come up.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One debuggable target from `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: Option<String>,
}

impl TargetInfo {
    /// Whether this target is an attachable page.
    pub fn is_page(&self) -> bool {
        self.kind == "page" && self.ws_url.is_some()
    }
}

/// Browser build info from `/json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
}

/// Client for the discovery API of one browser instance.
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
    base: String,
    http: reqwest::Client,
}

impl DevToolsEndpoint {
    pub fn new(host: &str, port: u16, secure: bool) -> Self {
        let scheme = if secure { "https" } else { "http" };
        Self { base: format!("{scheme}://{host}:{port}"), http: reqwest::Client::new() }
    }

    /// Fetch `/json/version`.
    pub async fn version(&self) -> Result<VersionInfo> {
        let url = format!("{}/json/version", self.base);
        let response = self.get(&url).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Cdp(format!("bad /json/version payload: {e}")))
    }

    /// Enumerate debuggable targets.
    pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
        let url = format!("{}/json/list", self.base);
        let response = self.get(&url).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Cdp(format!("bad /json/list payload: {e}")))
    }

    /// The first attachable page target.
    pub async fn first_page(&self) -> Result<TargetInfo> {
        self.targets()
            .await?
            .into_iter()
            .find(|target| target.is_page())
            .ok_or_else(|| Error::Cdp("no attachable page target".into()))
    }

    /// Open a new tab pointed at `url`, returning its target record.
    pub async fn open_tab(&self, url: &str) -> Result<TargetInfo> {
        // Chrome 111+ rejects GET here, this must be a PUT.
        let endpoint = format!("{}/json/new?{url}", self.base);
        let response = self
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|e| Error::Connect { url: endpoint.clone(), reason: e.to_string() })?
            .error_for_status()
            .map_err(|e| Error::Cdp(format!("open tab failed: {e}")))?;
        let target: TargetInfo = response
            .json()
            .await
            .map_err(|e| Error::Cdp(format!("bad /json/new payload: {e}")))?;
        debug!(target = target.id, "opened tab");
        Ok(target)
    }

    /// Close a tab by target id.
    pub async fn close_tab(&self, id: &str) -> Result<()> {
        let url = format!("{}/json/close/{id}", self.base);
        self.get(&url)
            .await?
            .error_for_status()
            .map_err(|e| Error::Cdp(format!("close tab failed: {e}")))?;
        debug!(target = id, "closed tab");
        Ok(())
    }

    /// Poll `/json/version` until the endpoint answers or the deadline
    /// passes. Used after launching a browser process.
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<VersionInfo> {
        let until = Instant::now() + deadline;
        loop {
            let reason = match self.version().await {
                Ok(version) => return Ok(version),
                Err(e) => e.to_string(),
            };
            if Instant::now() >= until {
                return Err(Error::Launch(format!(
                    "debugging endpoint never came up at {}: {reason}",
                    self.base
                )));
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Connect { url: url.to_string(), reason: e.to_string() })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_decodes_list_entry() {
        let target: TargetInfo = serde_json::from_str(
            r#"{
                "id": "A1B2",
                "type": "page",
                "title": "Example Domain",
                "url": "https://example.com/",
                "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/A1B2"
            }"#,
        )
        .unwrap();
        assert_eq!(target.id, "A1B2");
        assert!(target.is_page());
    }

    #[test]
    fn test_target_without_socket_is_not_attachable() {
        let target: TargetInfo = serde_json::from_str(
            r#"{"id": "X", "type": "page", "title": "", "url": ""}"#,
        )
        .unwrap();
        assert!(!target.is_page());

        let worker: TargetInfo = serde_json::from_str(
            r#"{
                "id": "W",
                "type": "service_worker",
                "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/W"
            }"#,
        )
        .unwrap();
        assert!(!worker.is_page());
    }

    #[test]
    fn test_version_decodes() {
        let version: VersionInfo = serde_json::from_str(
            r#"{"Browser": "Chrome/126.0.6478.126", "Protocol-Version": "1.3"}"#,
        )
        .unwrap();
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.browser.starts_with("Chrome/"));
    }

    #[test]
    fn test_endpoint_base_url() {
        let plain = DevToolsEndpoint::new("localhost", 9222, false);
        assert_eq!(plain.base, "http://localhost:9222");

        let secure = DevToolsEndpoint::new("example.com", 443, true);
        assert_eq!(secure.base, "https://example.com:443");
    }
}
