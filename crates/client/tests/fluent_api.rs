//! Integration tests driving the fluent chain through the public surface.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
};

use tiller::{
    Chain, Command, Cookie, CookieInput, Driver, Error, Options, PdfOptions, Result, WaitFor,
};

// ── Scripted driver ──────────────────────────────────────────────────────────

/// Command log shared with the test body after the driver has been moved
/// into a chain.
#[derive(Clone, Default)]
struct DriverLog {
    commands: Arc<Mutex<Vec<Command>>>,
    closes: Arc<Mutex<usize>>,
}

impl DriverLog {
    fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn close_count(&self) -> usize {
        *self.closes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A driver whose replies come from a script instead of a browser.
struct ScriptedDriver {
    log: DriverLog,
    script: Box<dyn FnMut(&Command) -> Result<Value> + Send>,
}

impl ScriptedDriver {
    fn new(script: impl FnMut(&Command) -> Result<Value> + Send + 'static) -> (Self, DriverLog) {
        let log = DriverLog::default();
        (Self { log: log.clone(), script: Box::new(script) }, log)
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn run(&mut self, command: Command) -> Result<Value> {
        let result = (self.script)(&command);
        self.log
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        result
    }

    async fn close(&mut self) -> Result<()> {
        *self.log.closes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Options with implicit waiting off, leaving the log exactly as queued.
fn plain() -> Options {
    Options { implicit_wait: false, ..Options::default() }
}

// ── Flows ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_flow_with_implicit_waiting() {
    let (driver, log) = ScriptedDriver::new(|command| match command {
        Command::Evaluate { .. } => Ok(json!(["first", "second"])),
        _ => Ok(Value::Null),
    });

    let titles: Vec<String> = Chain::with_driver(driver, Options::default())
        .goto("https://example.com/search")
        .type_into("#q", "fluent rust")
        .press(13)
        .wait("#results")
        .evaluate("[...document.querySelectorAll('#results h3')].map(n => n.textContent)")
        .end()
        .await
        .unwrap();

    assert_eq!(titles, vec!["first", "second"]);
    assert_eq!(log.close_count(), 1);
    assert_eq!(
        log.commands(),
        vec![
            Command::Ready { selector: None },
            Command::Goto { url: "https://example.com/search".into() },
            Command::Ready { selector: Some("#q".into()) },
            Command::Type { text: "fluent rust".into(), selector: Some("#q".into()) },
            Command::Ready { selector: None },
            Command::Press { key_code: 13, count: 1, modifiers: 0 },
            // Explicit waits never get a readiness step of their own.
            Command::Wait(WaitFor::Selector { selector: "#results".into() }),
            Command::Ready { selector: None },
            Command::Evaluate {
                expression: "[...document.querySelectorAll('#results h3')].map(n => n.textContent)"
                    .into(),
                args: Vec::new(),
            },
        ]
    );
}

#[tokio::test]
async fn test_first_failure_skips_the_rest_and_releases_the_browser() {
    let (driver, log) = ScriptedDriver::new(|command| match command {
        Command::Click { selector } => Err(Error::ElementNotFound(selector.clone())),
        _ => Ok(Value::Null),
    });

    let error = Chain::with_driver(driver, Options::default())
        .goto("https://example.com")
        .click(".buy")
        .type_into("#qty", "2")
        .html()
        .end()
        .await
        .unwrap_err();

    assert!(matches!(error, Error::ElementNotFound(_)));
    assert_eq!(log.close_count(), 1);
    // Nothing behind the failing click reached the driver.
    assert_eq!(
        log.commands(),
        vec![
            Command::Ready { selector: None },
            Command::Goto { url: "https://example.com".into() },
            Command::Ready { selector: Some(".buy".into()) },
            Command::Click { selector: ".buy".into() },
        ]
    );
}

#[tokio::test]
async fn test_cookie_round_trip() {
    let (driver, log) = ScriptedDriver::new(|command| match command {
        Command::Cookies { name: Some(name) } => Ok(json!([
            {"name": name, "value": "abc", "domain": ".example.com"}
        ])),
        _ => Ok(Value::Null),
    });

    let cookies = Chain::with_driver(driver, plain())
        .set_cookie(CookieInput::new("sid", "abc"))
        .cookies_named("sid")
        .end()
        .await
        .unwrap();

    assert_eq!(
        cookies,
        Some(vec![Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: ".example.com".into(),
            ..Cookie::default()
        }])
    );
    assert_eq!(
        log.commands(),
        vec![
            Command::SetCookies { cookies: vec![CookieInput::new("sid", "abc")] },
            Command::Cookies { name: Some("sid".into()) },
        ]
    );
}

#[tokio::test]
async fn test_pdf_resolves_the_written_path() {
    let (driver, log) = ScriptedDriver::new(|command| match command {
        Command::Pdf(_) => Ok(json!("/tmp/tiller-report.pdf")),
        _ => Ok(Value::Null),
    });
    let options = PdfOptions {
        landscape: Some(true),
        print_background: Some(true),
        ..PdfOptions::default()
    };

    let path = Chain::with_driver(driver, plain())
        .goto("https://example.com/invoice")
        .pdf(options.clone())
        .end()
        .await
        .unwrap();

    assert_eq!(path, PathBuf::from("/tmp/tiller-report.pdf"));
    assert_eq!(
        log.commands(),
        vec![
            Command::Goto { url: "https://example.com/invoice".into() },
            Command::Pdf(options),
        ]
    );
}
