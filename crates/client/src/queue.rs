//! Ordered execution of commands against a [`Driver`].
//!
//! The queue is an actor that owns the driver. Jobs arrive on an unbounded
//! channel and run strictly one at a time, in submission order. The first
//! failure latches: everything behind it is skipped, queries reject with a
//! clone of the failure, and the original surfaces at [`CommandQueue::end`]
//! if no query ever observed it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, info, warn},
};

use tiller_protocol::{Command, Driver, Error, Result};

/// One unit of work for the actor.
enum Job {
    /// Execute a command. Queries carry a reply slot, actions do not.
    Run {
        command: Command,
        reply: Option<oneshot::Sender<Result<Value>>>,
    },
    /// Acknowledge once everything ahead has run, reporting the latched
    /// failure if there is one. Never touches the driver.
    Flush { reply: oneshot::Sender<Result<()>> },
    /// Release the driver and acknowledge.
    End { reply: oneshot::Sender<Result<()>> },
}

/// Handle to a spawned command queue. Cheap to clone; every clone feeds the
/// same actor.
#[derive(Clone, Debug)]
pub struct CommandQueue {
    jobs: mpsc::UnboundedSender<Job>,
    implicit_wait: bool,
    ended: Arc<AtomicBool>,
}

impl CommandQueue {
    /// Spawn an actor that takes ownership of `driver`.
    ///
    /// With `implicit_wait`, every command except the wait primitives gets a
    /// readiness step queued in front of it, scoped to the command's target
    /// selector when it has one. `debug` raises per-command logging from
    /// debug to info.
    pub fn spawn(driver: Box<dyn Driver>, implicit_wait: bool, debug: bool) -> Self {
        let (jobs, inbox) = mpsc::unbounded_channel();
        tokio::spawn(run_driver(driver, inbox, debug));
        Self {
            jobs,
            implicit_wait,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule an action. A failure surfaces at the next query or at
    /// [`CommandQueue::end`].
    pub fn enqueue(&self, command: Command) {
        self.submit(command, None);
    }

    /// Schedule a query. The receiver resolves once everything queued ahead
    /// of it has run.
    pub fn process(&self, command: Command) -> oneshot::Receiver<Result<Value>> {
        let (reply, rx) = oneshot::channel();
        self.submit(command, Some(reply));
        rx
    }

    /// Wait until everything submitted so far has run.
    ///
    /// Resolves with the latched failure if one is pending, which counts as
    /// observing it.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.jobs.send(Job::Flush { reply }).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Run down the queue, release the driver, and stop the actor.
    ///
    /// Returns the latched failure if no query observed it along the way.
    /// Calling `end` again resolves without touching the driver.
    pub async fn end(&self) -> Result<()> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        if self.jobs.send(Job::End { reply }).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    fn submit(&self, command: Command, reply: Option<oneshot::Sender<Result<Value>>>) {
        if self.ended.load(Ordering::SeqCst) {
            reject_after_end(command, reply);
            return;
        }
        if self.implicit_wait && !command.is_wait() {
            let selector = command.target_selector().map(str::to_string);
            let _ = self.jobs.send(Job::Run {
                command: Command::Ready { selector },
                reply: None,
            });
        }
        if let Err(refused) = self.jobs.send(Job::Run { command, reply }) {
            // The actor is gone; hand the refusal back through the reply.
            if let Job::Run { command, reply } = refused.0 {
                reject_after_end(command, reply);
            }
        }
    }
}

fn reject_after_end(command: Command, reply: Option<oneshot::Sender<Result<Value>>>) {
    debug!(%command, "dropped, chain already ended");
    if let Some(reply) = reply {
        let _ = reply.send(Err(Error::usage("chain already ended")));
    }
}

async fn run_driver(
    mut driver: Box<dyn Driver>,
    mut inbox: mpsc::UnboundedReceiver<Job>,
    debug: bool,
) {
    let mut latched: Option<Error> = None;
    let mut observed = false;
    let mut ended = false;

    while let Some(job) = inbox.recv().await {
        match job {
            Job::Run { command, reply } => {
                if let Some(error) = &latched {
                    debug!(%command, "skipped after earlier failure");
                    if let Some(reply) = reply
                        && reply.send(Err(error.clone())).is_ok()
                    {
                        observed = true;
                    }
                    continue;
                }

                if debug {
                    info!(%command, "run");
                } else {
                    debug!(%command, "run");
                }

                match driver.run(command).await {
                    Ok(value) => {
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(value));
                        }
                    },
                    Err(error) => {
                        warn!(%error, "command failed, chain halted");
                        if let Some(reply) = reply
                            && reply.send(Err(error.clone())).is_ok()
                        {
                            observed = true;
                        }
                        latched = Some(error);
                    },
                }
            },
            Job::Flush { reply } => {
                let result = match &latched {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                };
                if reply.send(result).is_ok() && latched.is_some() {
                    observed = true;
                }
            },
            Job::End { reply } => {
                let closed = driver.close().await;
                let result = match latched.take() {
                    Some(error) if !observed => Err(error),
                    _ => closed,
                };
                let _ = reply.send(result);
                ended = true;
                break;
            },
        }
    }

    if !ended {
        // Every handle dropped without an end call.
        if let Some(error) = &latched
            && !observed
        {
            warn!(%error, "chain dropped with an unobserved failure");
        }
        if let Err(error) = driver.close().await {
            debug!(%error, "driver release failed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use tiller_protocol::WaitFor;

    use super::*;
    use crate::test_support::MockDriver;

    fn queue(driver: MockDriver) -> CommandQueue {
        CommandQueue::spawn(Box::new(driver), false, false)
    }

    #[tokio::test]
    async fn test_actions_run_in_submission_order() {
        let (driver, observer) = MockDriver::quiet();
        let queue = queue(driver);
        for x in 0..5 {
            queue.enqueue(Command::Scroll { x, y: 0 });
        }
        queue.end().await.unwrap();

        let xs: Vec<i64> = observer
            .commands()
            .iter()
            .map(|command| match command {
                Command::Scroll { x, .. } => *x,
                other => panic!("unexpected command {other}"),
            })
            .collect();
        assert_eq!(xs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_query_waits_for_prior_actions() {
        let (driver, observer) = MockDriver::new(|command| match command {
            Command::Html => Ok(json!("<p>done</p>")),
            _ => Ok(Value::Null),
        });
        let queue = queue(driver);
        queue.enqueue(Command::Goto { url: "https://example.com".into() });
        queue.enqueue(Command::Click { selector: "#go".into() });
        let reply = queue.process(Command::Html);

        let value = reply.await.unwrap().unwrap();
        assert_eq!(value, json!("<p>done</p>"));
        assert_eq!(
            observer.commands(),
            vec![
                Command::Goto { url: "https://example.com".into() },
                Command::Click { selector: "#go".into() },
                Command::Html,
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_latches_and_rejects_later_work() {
        let (driver, observer) = MockDriver::new(|command| match command {
            Command::Click { .. } => Err(Error::ElementNotFound("#missing".into())),
            _ => Ok(Value::Null),
        });
        let queue = queue(driver);
        queue.enqueue(Command::Click { selector: "#missing".into() });
        queue.enqueue(Command::ClearCache);
        let reply = queue.process(Command::Html);

        let error = reply.await.unwrap().unwrap_err();
        assert!(matches!(error, Error::ElementNotFound(_)));
        // Neither the action nor the query behind the failure ran.
        assert_eq!(
            observer.commands(),
            vec![Command::Click { selector: "#missing".into() }]
        );
    }

    #[tokio::test]
    async fn test_unobserved_failure_surfaces_at_end() {
        let (driver, observer) = MockDriver::new(|command| match command {
            Command::Goto { url } => Err(Error::Navigation {
                url: url.clone(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            }),
            _ => Ok(Value::Null),
        });
        let queue = queue(driver);
        queue.enqueue(Command::Goto { url: "https://no.such.host".into() });

        let error = queue.end().await.unwrap_err();
        assert!(matches!(error, Error::Navigation { .. }));
        // The driver is still released.
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_observed_failure_makes_end_clean() {
        let (driver, observer) = MockDriver::new(|command| match command {
            Command::Click { .. } => Err(Error::ElementNotFound("#x".into())),
            _ => Ok(Value::Null),
        });
        let queue = queue(driver);
        queue.enqueue(Command::Click { selector: "#x".into() });
        queue.process(Command::Html).await.unwrap().unwrap_err();

        queue.end().await.unwrap();
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_synchronizes_with_queued_work() {
        let (driver, observer) = MockDriver::quiet();
        let queue = queue(driver);
        for x in 0..3 {
            queue.enqueue(Command::Scroll { x, y: 0 });
        }
        queue.flush().await.unwrap();
        assert_eq!(observer.commands().len(), 3);
        assert_eq!(observer.close_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_reports_latched_failure() {
        let (driver, observer) = MockDriver::new(|command| match command {
            Command::ClearCache => Err(Error::Cdp("cache refused".into())),
            _ => Ok(Value::Null),
        });
        let queue = queue(driver);
        queue.enqueue(Command::ClearCache);

        let error = queue.flush().await.unwrap_err();
        assert!(matches!(error, Error::Cdp(_)));
        // Flushing counts as observing; end comes back clean.
        queue.end().await.unwrap();
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_end_twice_closes_once() {
        let (driver, observer) = MockDriver::quiet();
        let queue = queue(driver);
        queue.end().await.unwrap();
        queue.end().await.unwrap();
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_implicit_wait_injects_scoped_readiness() {
        let (driver, observer) = MockDriver::quiet();
        let queue = CommandQueue::spawn(Box::new(driver), true, false);
        queue.enqueue(Command::Goto { url: "https://example.com".into() });
        queue.enqueue(Command::Click { selector: "#btn".into() });
        queue.enqueue(Command::Wait(WaitFor::Timeout { timeout_ms: 1 }));
        queue.end().await.unwrap();

        assert_eq!(
            observer.commands(),
            vec![
                Command::Ready { selector: None },
                Command::Goto { url: "https://example.com".into() },
                Command::Ready { selector: Some("#btn".into()) },
                Command::Click { selector: "#btn".into() },
                Command::Wait(WaitFor::Timeout { timeout_ms: 1 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_work_after_end_is_rejected() {
        let (driver, observer) = MockDriver::quiet();
        let queue = queue(driver);
        queue.end().await.unwrap();

        queue.enqueue(Command::ClearCache);
        let error = queue.process(Command::Html).await.unwrap().unwrap_err();
        assert!(matches!(error, Error::Usage(_)));
        assert!(observer.commands().is_empty());
    }
}
