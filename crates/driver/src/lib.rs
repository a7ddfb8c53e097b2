//! Browser transports for the tiller client: launch or attach, plus the
//! DevTools plumbing underneath.
//!
//! Two [`tiller_protocol::Driver`] implementations live here:
//!
//! - [`LocalDriver`]: spawns a Chrome/Chromium process with a scratch
//!   profile and drives its initial page target.
//! - [`RemoteDriver`]: attaches to an already-running browser through its
//!   debugging endpoint and drives a freshly opened tab.
//!
//! Both connect lazily on the first executed command. The supporting
//! modules are usable on their own: binary discovery ([`detect`]), process
//! supervision ([`launch`]), the discovery HTTP API ([`targets`]), the raw
//! DevTools socket ([`cdp`]), and command execution against one page
//! ([`tab`]).
//!
//! # Example
//!
//! ```ignore
//! use tiller_driver::{LaunchSpec, LocalDriver};
//! use tiller_protocol::{Command, Driver};
//!
//! let spec = LaunchSpec { port: 0, headless: true, chrome_path: None, args: vec![] };
//! let mut driver = LocalDriver::new(spec, std::time::Duration::from_secs(10), None);
//! driver.run(Command::Goto { url: "https://example.com".into() }).await?;
//! driver.close().await?;
//! ```

pub mod cdp;
pub mod detect;
pub mod launch;
pub mod local;
pub mod remote;
pub mod tab;
pub mod targets;

pub use {
    launch::LaunchSpec,
    local::LocalDriver,
    remote::{AttachSpec, RemoteDriver},
    tab::Tab,
};
