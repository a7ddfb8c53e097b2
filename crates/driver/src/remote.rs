//! Driver attached to an already-running browser.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde_json::Value,
    tracing::{info, warn},
};

use tiller_protocol::{Command, Driver, Error, Result, Viewport};

use crate::{
    tab::Tab,
    targets::{DevToolsEndpoint, TargetInfo},
};

/// Where to find the browser's debugging endpoint.
#[derive(Debug, Clone)]
pub struct AttachSpec {
    pub host: String,
    pub port: u16,
    /// Use https/wss for discovery and the target socket.
    pub secure: bool,
    /// Close the tab this driver opened when the session ends.
    pub close_tab: bool,
}

/// Drives a browser someone else started.
///
/// On the first command it opens a fresh tab through the discovery API and
/// attaches to it. `close` detaches and, per [`AttachSpec::close_tab`],
/// closes that tab; the browser itself is left running.
pub struct RemoteDriver {
    spec: AttachSpec,
    wait_timeout: Duration,
    viewport: Option<Viewport>,
    session: Option<Session>,
}

struct Session {
    endpoint: DevToolsEndpoint,
    target_id: String,
    tab: Tab,
}

impl RemoteDriver {
    /// `viewport`, when set, is emulated as soon as the session opens.
    pub fn new(spec: AttachSpec, wait_timeout: Duration, viewport: Option<Viewport>) -> Self {
        Self { spec, wait_timeout, viewport, session: None }
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let endpoint = DevToolsEndpoint::new(&self.spec.host, self.spec.port, self.spec.secure);
        let target = endpoint.open_tab("about:blank").await?;
        let tab = match self.attach_tab(&target).await {
            Ok(tab) => tab,
            Err(error) => {
                // close never sees this tab; put it back before surfacing
                // the error.
                if self.spec.close_tab
                    && let Err(e) = endpoint.close_tab(&target.id).await
                {
                    warn!(error = %e, target = target.id, "orphaned tab close failed");
                }
                return Err(error);
            },
        };
        info!(
            host = %self.spec.host,
            port = self.spec.port,
            target = target.id,
            "attached to remote browser"
        );

        self.session = Some(Session { endpoint, target_id: target.id, tab });
        Ok(())
    }

    /// Attach to a freshly opened target and apply the startup viewport.
    async fn attach_tab(&self, target: &TargetInfo) -> Result<Tab> {
        let ws_url = target
            .ws_url
            .as_deref()
            .ok_or_else(|| Error::Cdp("new tab came back without a debugger URL".into()))?;
        let tab = Tab::attach(&secure_ws_url(ws_url, self.spec.secure), self.wait_timeout).await?;
        if let Some(viewport) = &self.viewport
            && let Err(error) = tab.execute(Command::SetViewport(viewport.clone())).await
        {
            tab.detach().await;
            return Err(error);
        }
        Ok(tab)
    }
}

#[async_trait]
impl Driver for RemoteDriver {
    async fn run(&mut self, command: Command) -> Result<Value> {
        self.ensure_session().await?;
        match &self.session {
            Some(session) => session.tab.execute(command).await,
            None => Err(Error::ConnectionClosed("browser session unavailable".into())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.tab.detach().await;
            if self.spec.close_tab
                && let Err(e) = session.endpoint.close_tab(&session.target_id).await
            {
                // The browser may already be gone; teardown stays quiet.
                warn!(error = %e, target = session.target_id, "tab close failed");
            }
        }
        Ok(())
    }
}

/// Discovery reports a plain `ws://` debugger URL even when the endpoint is
/// served over TLS; rewrite the scheme when attaching securely.
fn secure_ws_url(ws_url: &str, secure: bool) -> String {
    if secure && let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("wss://{rest}")
    } else {
        ws_url.to_string()
    }
}
