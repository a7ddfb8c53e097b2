//! Launch and supervise a local browser process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tempfile::TempDir,
    tokio::{
        process::{Child, Command},
        time::{Instant, sleep},
    },
    tracing::{debug, info, warn},
};

use tiller_protocol::{Error, Result};

use crate::{detect, targets::DevToolsEndpoint};

/// How long to wait for the debugging endpoint after spawn.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll interval for the `DevToolsActivePort` marker file.
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launch parameters for a local browser process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Debugging port to bind. 0 lets the browser pick a free one, reported
    /// through the `DevToolsActivePort` file in the profile directory.
    pub port: u16,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Extra arguments appended verbatim.
    pub args: Vec<String>,
}

/// A running browser process owned by this driver.
///
/// Each process gets a scratch profile directory; killing the child on
/// shutdown removes both. The child is also killed if it is still running
/// when this value drops, so a failed startup cannot leak a process.
pub struct BrowserProcess {
    child: Child,
    profile: TempDir,
    port: u16,
}

impl BrowserProcess {
    /// Spawn the browser and wait for its debugging endpoint to answer.
    pub async fn launch(spec: &LaunchSpec) -> Result<Self> {
        let binary = detect::find_browser(spec.chrome_path.as_deref())?;
        let profile = tempfile::Builder::new()
            .prefix("tiller-profile-")
            .tempdir()
            .map_err(|e| Error::Launch(format!("profile dir: {e}")))?;

        let args = build_args(spec, profile.path());
        info!(
            binary = %binary.display(),
            port = spec.port,
            headless = spec.headless,
            "launching browser"
        );

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {e}", binary.display())))?;

        let mut process = Self { child, profile, port: spec.port };
        if process.port == 0 {
            process.port = wait_for_active_port(process.profile.path(), STARTUP_TIMEOUT).await?;
        }

        let endpoint = DevToolsEndpoint::new("localhost", process.port, false);
        let version = endpoint.wait_until_ready(STARTUP_TIMEOUT).await?;
        debug!(browser = version.browser, port = process.port, "debugging endpoint up");

        Ok(process)
    }

    /// The debugging port the process actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kill the process; the scratch profile goes with it.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "browser process kill failed");
        }
        debug!(port = self.port, "browser process stopped");
    }
}

fn build_args(spec: &LaunchSpec, profile: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", spec.port),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
    ];
    if spec.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(spec.args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Read the port the browser picked out of its `DevToolsActivePort` file.
/// Written by the browser once the debugging endpoint is bound; the first
/// line is the port.
async fn wait_for_active_port(profile: &Path, deadline: Duration) -> Result<u16> {
    let marker = profile.join("DevToolsActivePort");
    let until = Instant::now() + deadline;
    loop {
        if let Ok(contents) = tokio::fs::read_to_string(&marker).await
            && let Some(port) = parse_active_port(&contents)
        {
            return Ok(port);
        }
        if Instant::now() >= until {
            return Err(Error::Launch(
                "browser never reported its debugging port (DevToolsActivePort)".into(),
            ));
        }
        sleep(PORT_POLL_INTERVAL).await;
    }
}

fn parse_active_port(contents: &str) -> Option<u16> {
    let port: u16 = contents.lines().next()?.trim().parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(port)
}
