//! Drive a headless browser through a fluent, awaitable command chain.
//!
//! A [`Chain`] queues commands and runs them strictly in order against one
//! browser tab, reached over the DevTools protocol. Actions hand the chain
//! back unchanged; queries re-type it with their result. Awaiting the
//! chain resolves the most recent query once the queue reaches it;
//! [`Chain::end`] runs the whole queue down and then releases the browser.
//!
//! ```ignore
//! use tiller::{Chain, Options};
//!
//! let screenshot = Chain::new(Options::default())
//!     .goto("https://example.com")
//!     .type_into("input[name=q]", "rust browser automation")
//!     .press(13)
//!     .wait("#results")
//!     .screenshot()
//!     .end()
//!     .await?;
//! ```
//!
//! Features:
//! - launches a browser or attaches to a running one, picked by [`Options`]
//! - readiness waits injected before each command, scoped to its selector
//! - the first failure halts the queue and surfaces at the next await
//! - custom transports through the [`Driver`] trait

pub mod chain;
pub mod config;
pub mod queue;

#[cfg(test)]
mod test_support;

pub use {
    chain::Chain,
    config::{CdpOptions, LaunchOptions, Options},
    queue::CommandQueue,
};

pub use tiller_protocol::{
    Command, Cookie, CookieInput, Driver, Error, PdfOptions, Result, Viewport, WaitFor,
};
