//! Driver over a browser process this crate launches and owns.

use std::time::Duration;

use {async_trait::async_trait, serde_json::Value, tracing::info};

use tiller_protocol::{Command, Driver, Error, Result, Viewport};

use crate::{
    launch::{BrowserProcess, LaunchSpec},
    tab::Tab,
    targets::DevToolsEndpoint,
};

/// Drives a browser launched on demand.
///
/// Construction does nothing; the process is spawned and its initial page
/// target attached when the first command executes. `close` kills the
/// process along with its scratch profile.
pub struct LocalDriver {
    spec: LaunchSpec,
    wait_timeout: Duration,
    viewport: Option<Viewport>,
    session: Option<Session>,
}

struct Session {
    process: BrowserProcess,
    tab: Tab,
}

impl LocalDriver {
    /// `viewport`, when set, is emulated as soon as the session opens.
    pub fn new(spec: LaunchSpec, wait_timeout: Duration, viewport: Option<Viewport>) -> Self {
        Self { spec, wait_timeout, viewport, session: None }
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let process = BrowserProcess::launch(&self.spec).await?;
        let endpoint = DevToolsEndpoint::new("localhost", process.port(), false);
        let target = endpoint.first_page().await?;
        let ws_url = target
            .ws_url
            .as_deref()
            .ok_or_else(|| Error::Cdp("page target without a debugger URL".into()))?;
        let tab = Tab::attach(ws_url, self.wait_timeout).await?;
        if let Some(viewport) = &self.viewport {
            tab.execute(Command::SetViewport(viewport.clone())).await?;
        }
        info!(port = process.port(), target = target.id, "attached to launched browser");

        self.session = Some(Session { process, tab });
        Ok(())
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn run(&mut self, command: Command) -> Result<Value> {
        self.ensure_session().await?;
        match &self.session {
            Some(session) => session.tab.execute(command).await,
            None => Err(Error::ConnectionClosed("browser session unavailable".into())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.tab.detach().await;
            session.process.shutdown().await;
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> LocalDriver {
        LocalDriver::new(
            LaunchSpec { port: 0, headless: true, chrome_path: None, args: vec![] },
            Duration::from_secs(1),
            None,
        )
    }

    #[test]
    fn test_construction_does_not_connect() {
        let driver = driver();
        assert!(driver.session.is_none());
    }

    #[tokio::test]
    async fn test_close_without_session_is_ok() {
        let mut driver = driver();
        driver.close().await.unwrap();
        driver.close().await.unwrap();
    }
}
