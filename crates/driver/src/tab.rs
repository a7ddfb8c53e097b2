//! Attached page target: expresses every command as DevTools calls.

use std::{env, path::PathBuf, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde_json::{Value, json},
    tokio::time::{Instant, sleep},
    tracing::debug,
    url::Url,
    uuid::Uuid,
};

use tiller_protocol::{Command, CookieInput, Error, PdfOptions, Result, Viewport, WaitFor};

use crate::cdp::CdpConnection;

/// How often selector and predicate waits re-check the page.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One attached page target.
///
/// Owns the DevTools socket for the target and knows how to express each
/// [`Command`] as protocol calls against it. Selector, predicate, and
/// readiness waits are bounded by the timeout handed over at attach time.
pub struct Tab {
    conn: CdpConnection,
    frame_id: String,
    wait_timeout: Duration,
}

impl Tab {
    /// Attach to a page target's `webSocketDebuggerUrl` and enable the
    /// domains the command set relies on.
    pub async fn attach(ws_url: &str, wait_timeout: Duration) -> Result<Self> {
        let conn = CdpConnection::connect(ws_url).await?;
        for domain in ["Page", "DOM", "Runtime", "Network"] {
            conn.enable(domain).await?;
        }

        // The main frame id is stable for the lifetime of the target.
        let tree = conn.call("Page.getFrameTree", json!({})).await?;
        let frame_id = tree
            .get("frameTree")
            .and_then(|t| t.get("frame"))
            .and_then(|f| f.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::cdp("Page.getFrameTree returned no main frame id"))?
            .to_string();

        Ok(Self { conn, frame_id, wait_timeout })
    }

    /// Execute one command, returning its payload. Actions resolve to
    /// `Value::Null`.
    pub async fn execute(&self, command: Command) -> Result<Value> {
        debug!(%command, "executing command");
        // Only navigation consumes events; whatever the enabled domains
        // pushed since the last command is stale and would otherwise sit
        // buffered for the life of the session.
        self.conn.clear_events().await;
        match command {
            Command::Goto { url } => self.goto(&url).await,
            Command::SetUserAgent { user_agent } => {
                self.conn
                    .call("Network.setUserAgentOverride", json!({"userAgent": user_agent}))
                    .await?;
                Ok(Value::Null)
            },
            Command::Click { selector } => {
                self.dispatch_mouse(&selector, &["mousePressed", "mouseReleased"]).await
            },
            Command::MouseDown { selector } => self.dispatch_mouse(&selector, &["mousePressed"]).await,
            Command::MouseUp { selector } => self.dispatch_mouse(&selector, &["mouseReleased"]).await,
            Command::Wait(wait) => self.wait(wait).await,
            Command::Ready { selector } => self.ready(selector.as_deref()).await,
            Command::Focus { selector } => self.focus(&selector).await,
            Command::Press { key_code, count, modifiers } => {
                self.press(key_code, count, modifiers).await
            },
            Command::Type { text, selector } => self.type_text(&text, selector.as_deref()).await,
            Command::Scroll { x, y } => {
                self.eval(&format!("window.scrollTo({x}, {y})")).await?;
                Ok(Value::Null)
            },
            Command::ScrollToElement { selector } => self.scroll_to_element(&selector).await,
            Command::SetViewport(viewport) => self.set_viewport(&viewport).await,
            Command::SetHtml { html } => {
                self.conn
                    .call(
                        "Page.setDocumentContent",
                        json!({"frameId": self.frame_id, "html": html}),
                    )
                    .await?;
                Ok(Value::Null)
            },
            Command::SetCookies { cookies } => self.set_cookies(cookies).await,
            Command::DeleteCookies { name, url } => self.delete_cookies(&name, url).await,
            Command::ClearCookies => {
                self.conn.call("Network.clearBrowserCookies", json!({})).await?;
                Ok(Value::Null)
            },
            Command::ClearCache => {
                self.conn.call("Network.clearBrowserCache", json!({})).await?;
                Ok(Value::Null)
            },
            Command::ClearInput { selector } => self.clear_input(&selector).await,
            Command::Evaluate { expression, args } => {
                self.eval(&call_snippet(&expression, &args)).await
            },
            Command::InputValue { selector } => self.input_value(&selector).await,
            Command::Exists { selector } => self.eval(&exists_snippet(&selector)).await,
            Command::Screenshot => self.screenshot().await,
            Command::Html => self.eval("document.documentElement.outerHTML").await,
            Command::Pdf(options) => self.pdf(&options).await,
            Command::Cookies { name } => self.cookies(name.as_deref()).await,
            Command::AllCookies => self.all_cookies().await,
        }
    }

    /// Drop the socket. The target itself stays open.
    pub async fn detach(&self) {
        self.conn.close().await;
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    async fn goto(&self, url: &str) -> Result<Value> {
        Url::parse(url).map_err(|e| Error::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        self.conn.clear_events().await;
        let reply = self.conn.call("Page.navigate", json!({"url": url})).await?;
        if let Some(error_text) = reply.get("errorText").and_then(Value::as_str)
            && !error_text.is_empty()
        {
            return Err(Error::Navigation {
                url: url.to_string(),
                reason: error_text.to_string(),
            });
        }

        match self.conn.wait_for_event("Page.loadEventFired", self.wait_timeout).await {
            Ok(_) => {},
            Err(Error::Timeout { .. }) => {
                // Same-document navigations never fire the load event; accept
                // a document that already reports complete.
                let state = self.eval("document.readyState").await?;
                if state.as_str() != Some("complete") {
                    return Err(Error::Timeout {
                        what: format!("load of {url}"),
                        ms: self.wait_timeout.as_millis() as u64,
                    });
                }
            },
            Err(e) => return Err(e),
        }
        Ok(Value::Null)
    }

    // ── Scripting ────────────────────────────────────────────────────────────

    /// Evaluate an expression in the page and return its JSON value.
    async fn eval(&self, expression: &str) -> Result<Value> {
        let reply = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            return Err(Error::Evaluation(exception_message(details)));
        }
        Ok(reply
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// The page's current location.
    async fn current_url(&self) -> Result<String> {
        let value = self.eval("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::cdp("location.href did not evaluate to a string"))
    }

    // ── Elements ─────────────────────────────────────────────────────────────

    /// Resolve a selector to a DOM node id, erroring when nothing matches.
    async fn resolve_node(&self, selector: &str) -> Result<i64> {
        let document = self.conn.call("DOM.getDocument", json!({})).await?;
        let root_id = document
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::cdp("DOM.getDocument returned no root node"))?;

        let reply = self
            .conn
            .call("DOM.querySelector", json!({"nodeId": root_id, "selector": selector}))
            .await?;
        match reply.get("nodeId").and_then(Value::as_i64) {
            Some(node_id) if node_id != 0 => Ok(node_id),
            _ => Err(Error::ElementNotFound(selector.to_string())),
        }
    }

    /// Center of a selector's content box in CSS pixels.
    async fn element_center(&self, selector: &str) -> Result<(f64, f64)> {
        let node_id = self.resolve_node(selector).await?;
        let reply = self.conn.call("DOM.getBoxModel", json!({"nodeId": node_id})).await?;
        let quad: Vec<f64> = reply
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        quad_center(&quad).ok_or_else(|| {
            Error::cdp(format!("DOM.getBoxModel returned no usable quad for {selector}"))
        })
    }

    async fn dispatch_mouse(&self, selector: &str, events: &[&str]) -> Result<Value> {
        let (x, y) = self.element_center(selector).await?;
        for event in events {
            self.conn
                .call(
                    "Input.dispatchMouseEvent",
                    json!({"type": event, "x": x, "y": y, "button": "left", "clickCount": 1}),
                )
                .await?;
        }
        Ok(Value::Null)
    }

    async fn focus(&self, selector: &str) -> Result<Value> {
        let node_id = self.resolve_node(selector).await?;
        self.conn.call("DOM.focus", json!({"nodeId": node_id})).await?;
        Ok(Value::Null)
    }

    async fn press(&self, key_code: u32, count: u32, modifiers: u32) -> Result<Value> {
        for _ in 0..count {
            for kind in ["rawKeyDown", "keyUp"] {
                self.conn
                    .call("Input.dispatchKeyEvent", key_event(kind, key_code, modifiers))
                    .await?;
            }
        }
        Ok(Value::Null)
    }

    async fn type_text(&self, text: &str, selector: Option<&str>) -> Result<Value> {
        if let Some(selector) = selector {
            self.focus(selector).await?;
        }
        for ch in text.chars() {
            let ch = ch.to_string();
            for kind in ["keyDown", "keyUp"] {
                self.conn
                    .call(
                        "Input.dispatchKeyEvent",
                        json!({"type": kind, "text": ch, "unmodifiedText": ch, "key": ch}),
                    )
                    .await?;
            }
        }
        Ok(Value::Null)
    }

    async fn scroll_to_element(&self, selector: &str) -> Result<Value> {
        self.resolve_node(selector).await?;
        let snippet = format!(
            "document.querySelector({}).scrollIntoView({{block: 'center', inline: 'center'}})",
            js_string(selector)
        );
        self.eval(&snippet).await?;
        Ok(Value::Null)
    }

    async fn clear_input(&self, selector: &str) -> Result<Value> {
        self.resolve_node(selector).await?;
        self.eval(&format!("document.querySelector({}).value = ''", js_string(selector)))
            .await?;
        Ok(Value::Null)
    }

    async fn input_value(&self, selector: &str) -> Result<Value> {
        self.resolve_node(selector).await?;
        self.eval(&format!("document.querySelector({}).value", js_string(selector))).await
    }

    // ── Waits ────────────────────────────────────────────────────────────────

    async fn wait(&self, wait: WaitFor) -> Result<Value> {
        match wait {
            WaitFor::Timeout { timeout_ms } => sleep(Duration::from_millis(timeout_ms)).await,
            WaitFor::Selector { selector } => {
                self.poll_until(&exists_snippet(&selector), &format!("selector {selector}"))
                    .await?;
            },
            WaitFor::Predicate { expression, args } => {
                self.poll_until(&call_snippet(&expression, &args), "predicate").await?;
            },
        }
        Ok(Value::Null)
    }

    async fn ready(&self, selector: Option<&str>) -> Result<Value> {
        match selector {
            Some(selector) => {
                self.poll_until(&exists_snippet(selector), &format!("selector {selector}"))
                    .await?;
            },
            None => {
                self.poll_until("document.readyState !== 'loading'", "document readiness")
                    .await?;
            },
        }
        Ok(Value::Null)
    }

    /// Re-evaluate a script until it is truthy or the wait timeout elapses.
    /// Always checks at least once.
    async fn poll_until(&self, snippet: &str, what: &str) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if truthy(&self.eval(snippet).await?) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: what.to_string(),
                    ms: self.wait_timeout.as_millis() as u64,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    // ── Emulation ────────────────────────────────────────────────────────────

    async fn set_viewport(&self, viewport: &Viewport) -> Result<Value> {
        self.conn
            .call(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": viewport.scale,
                    "mobile": viewport.mobile,
                }),
            )
            .await?;
        self.conn
            .call("Emulation.setTouchEmulationEnabled", json!({"enabled": viewport.touch}))
            .await?;
        Ok(Value::Null)
    }

    // ── Cookies ──────────────────────────────────────────────────────────────

    async fn set_cookies(&self, mut cookies: Vec<CookieInput>) -> Result<Value> {
        // The protocol requires a url or domain per cookie; scope bare
        // name/value pairs to the current page.
        if cookies.iter().any(|c| c.url.is_none() && c.domain.is_none()) {
            let url = self.current_url().await?;
            for cookie in &mut cookies {
                if cookie.url.is_none() && cookie.domain.is_none() {
                    cookie.url = Some(url.clone());
                }
            }
        }
        self.conn.call("Network.setCookies", json!({"cookies": cookies})).await?;
        Ok(Value::Null)
    }

    async fn delete_cookies(&self, name: &str, url: Option<String>) -> Result<Value> {
        let url = match url {
            Some(url) => url,
            None => self.current_url().await?,
        };
        self.conn.call("Network.deleteCookies", json!({"name": name, "url": url})).await?;
        Ok(Value::Null)
    }

    async fn cookies(&self, name: Option<&str>) -> Result<Value> {
        // Without a urls filter the browser scopes this to the current page.
        let reply = self.conn.call("Network.getCookies", json!({})).await?;
        Ok(filter_cookies(reply, name))
    }

    async fn all_cookies(&self) -> Result<Value> {
        let reply = self.conn.call("Network.getAllCookies", json!({})).await?;
        Ok(filter_cookies(reply, None))
    }

    // ── Captures ─────────────────────────────────────────────────────────────

    async fn screenshot(&self) -> Result<Value> {
        let reply = self.conn.call("Page.captureScreenshot", json!({"format": "png"})).await?;
        self.write_capture(&reply, "png").await
    }

    async fn pdf(&self, options: &PdfOptions) -> Result<Value> {
        let params = serde_json::to_value(options).map_err(|e| Error::Capture(e.to_string()))?;
        let reply = self.conn.call("Page.printToPDF", params).await?;
        self.write_capture(&reply, "pdf").await
    }

    /// Decode a base64 `data` payload and persist it under the system temp
    /// directory, resolving with the file path.
    async fn write_capture(&self, reply: &Value, extension: &str) -> Result<Value> {
        let data = reply
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Capture("capture returned no data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| Error::Capture(format!("invalid base64 payload: {e}")))?;

        let path = capture_path(extension);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Capture(format!("write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "capture written");
        Ok(Value::String(path.to_string_lossy().into_owned()))
    }
}

// ── Script and parameter builders ────────────────────────────────────────────

/// A string embedded into a script, JSON-escaped.
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// `true` when any element matches the selector.
fn exists_snippet(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

/// Script for a caller-supplied expression. Function sources are applied to
/// `args`; anything else evaluates as a plain expression and ignores `args`.
fn call_snippet(expression: &str, args: &[Value]) -> String {
    let args = Value::Array(args.to_vec()).to_string();
    format!(
        "(() => {{ const subject = ({expression}); \
         return typeof subject === 'function' ? subject(...{args}) : subject; }})()"
    )
}

/// JavaScript truthiness of an evaluated result.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `Input.dispatchKeyEvent` parameters for a virtual key code.
fn key_event(kind: &str, key_code: u32, modifiers: u32) -> Value {
    json!({
        "type": kind,
        "modifiers": modifiers,
        "windowsVirtualKeyCode": key_code,
        "nativeVirtualKeyCode": key_code,
    })
}

/// The cookie array out of a `Network.getCookies`-shaped reply, optionally
/// narrowed to one name. Always an array, even when the reply carries none.
fn filter_cookies(reply: Value, name: Option<&str>) -> Value {
    let cookies = match reply.get("cookies").and_then(Value::as_array) {
        Some(cookies) => cookies
            .iter()
            .filter(|cookie| {
                name.is_none_or(|name| cookie.get("name").and_then(Value::as_str) == Some(name))
            })
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    Value::Array(cookies)
}

/// Best human-readable message out of a `Runtime.evaluate` exception object.
fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("unknown exception")
        .to_string()
}

/// Center of an 8-value content quad, `None` when malformed or collapsed.
fn quad_center(quad: &[f64]) -> Option<(f64, f64)> {
    if quad.len() < 8 {
        return None;
    }
    let xs = [quad[0], quad[2], quad[4], quad[6]];
    let ys = [quad[1], quad[3], quad[5], quad[7]];
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
}

/// A fresh path for a capture file under the system temp directory.
fn capture_path(extension: &str) -> PathBuf {
    env::temp_dir().join(format!("tiller-{}.{extension}", Uuid::new_v4()))
}
