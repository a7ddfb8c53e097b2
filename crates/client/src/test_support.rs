//! Scripted driver shared by the queue and chain tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use {async_trait::async_trait, serde_json::Value};

use tiller_protocol::{Command, Driver, Result};

type Script = dyn FnMut(&Command) -> Result<Value> + Send;

/// Counters and the command log, shared with the test body after the
/// driver itself has been moved into a queue.
#[derive(Clone, Default)]
pub(crate) struct MockObserver {
    commands: Arc<Mutex<Vec<Command>>>,
    closes: Arc<Mutex<usize>>,
}

impl MockObserver {
    /// Every command the driver has executed, in order.
    pub(crate) fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

/// A driver whose replies come from a script instead of a browser.
pub(crate) struct MockDriver {
    observer: MockObserver,
    script: Box<Script>,
}

impl MockDriver {
    pub(crate) fn new(
        script: impl FnMut(&Command) -> Result<Value> + Send + 'static,
    ) -> (Self, MockObserver) {
        let observer = MockObserver::default();
        (Self { observer: observer.clone(), script: Box::new(script) }, observer)
    }

    /// A driver that answers everything with `null`.
    pub(crate) fn quiet() -> (Self, MockObserver) {
        Self::new(|_| Ok(Value::Null))
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn run(&mut self, command: Command) -> Result<Value> {
        let result = (self.script)(&command);
        self.observer.commands.lock().unwrap().push(command);
        result
    }

    async fn close(&mut self) -> Result<()> {
        *self.observer.closes.lock().unwrap() += 1;
        Ok(())
    }
}
