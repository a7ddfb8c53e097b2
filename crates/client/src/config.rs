//! Chain configuration.
//!
//! [`Options`] is plain serializable data so embedders can load it from
//! their own config files. Every field has a default; `Options::default()`
//! launches a headless browser on an ephemeral port and injects readiness
//! waits before each command.

use std::{env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use tiller_protocol::Viewport;

/// Environment variables consulted when no explicit endpoint is set.
pub const HOST_ENV: &str = "TILLER_CDP_HOST";
pub const PORT_ENV: &str = "TILLER_CDP_PORT";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9222;

/// Top-level options for [`Chain::new`](crate::Chain::new).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Log every executed command at info level instead of debug.
    pub debug: bool,

    /// Upper bound in milliseconds for readiness and explicit waits.
    pub wait_timeout_ms: u64,

    /// Attach to a browser on another machine instead of driving a local
    /// one.
    pub remote: bool,

    /// Queue a readiness wait in front of every command.
    pub implicit_wait: bool,

    /// Launch a browser process. When false the chain attaches to one
    /// already listening locally.
    pub launch_chrome: bool,

    /// Viewport emulated when the session opens.
    pub viewport: Viewport,

    /// Debugging endpoint to attach to.
    pub cdp: CdpOptions,

    /// Process settings for launched browsers.
    pub launch: LaunchOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: false,
            wait_timeout_ms: 10_000,
            remote: false,
            implicit_wait: true,
            launch_chrome: true,
            viewport: Viewport::default(),
            cdp: CdpOptions::default(),
            launch: LaunchOptions::default(),
        }
    }
}

impl Options {
    /// The wait bound as a [`Duration`].
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Where the DevTools endpoint lives.
///
/// Unset `host` and `port` fall back to [`HOST_ENV`] / [`PORT_ENV`] before
/// the built-in `localhost:9222`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpOptions {
    pub host: Option<String>,
    pub port: Option<u16>,

    /// Use https and wss when talking to the endpoint.
    pub secure: bool,

    /// Close the tab the session opened when the chain ends. Only applies
    /// when attaching; launched browsers are torn down whole.
    pub close_tab: bool,
}

impl Default for CdpOptions {
    fn default() -> Self {
        Self { host: None, port: None, secure: false, close_tab: true }
    }
}

impl CdpOptions {
    /// Host to attach to: explicit value, then environment, then localhost.
    pub fn resolved_host(&self) -> String {
        self.host_from(|name| env::var(name).ok())
    }

    /// Port to attach to: explicit value, then environment, then 9222.
    pub fn resolved_port(&self) -> u16 {
        self.port_from(|name| env::var(name).ok(), DEFAULT_PORT)
    }

    /// Port for a browser we launch ourselves. Without an explicit or
    /// environment value the browser picks a free one.
    pub fn launch_port(&self) -> u16 {
        self.port_from(|name| env::var(name).ok(), 0)
    }

    fn host_from(&self, env: impl Fn(&str) -> Option<String>) -> String {
        self.host
            .clone()
            .or_else(|| env(HOST_ENV))
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    fn port_from(&self, env: impl Fn(&str) -> Option<String>, fallback: u16) -> u16 {
        if let Some(port) = self.port {
            return port;
        }
        env(PORT_ENV).and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
    }
}

/// Process settings for browsers the chain launches itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Run without a visible window.
    pub headless: bool,

    /// Explicit browser binary. Unset means auto-detect.
    pub chrome_path: Option<PathBuf>,

    /// Extra command line arguments, passed through verbatim.
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self { headless: true, chrome_path: None, args: Vec::new() }
    }
}
