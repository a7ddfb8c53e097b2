//! The execution seam between the command queue and a browser transport.

use {async_trait::async_trait, serde_json::Value};

use crate::{command::Command, error::Result};

/// Executes commands against one live browser session.
///
/// Implementations connect lazily: the first [`Driver::run`] establishes the
/// session. The owning queue never invokes `run` concurrently, so
/// implementations need no internal locking around session state.
#[async_trait]
pub trait Driver: Send {
    /// Execute one command. Query commands resolve with their payload;
    /// action commands resolve with [`Value::Null`].
    async fn run(&mut self, command: Command) -> Result<Value>;

    /// Release the session and any owned browser resources. Called at most
    /// once by the owning queue.
    async fn close(&mut self) -> Result<()>;
}
