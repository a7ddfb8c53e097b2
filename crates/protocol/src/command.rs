//! Command protocol spoken between the fluent client and a driver.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::types::{CookieInput, PdfOptions, Viewport};

/// One operation a driver executes against the browser.
///
/// Commands partition into actions (side effects, no caller-visible result)
/// and queries (resolve to a value delivered to exactly one caller);
/// [`Command::is_query`] is the source of truth for the split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Navigate to a URL and wait for the page to load.
    Goto { url: String },

    /// Override the user agent for the session.
    SetUserAgent { user_agent: String },

    /// Click the first element matching a selector.
    Click { selector: String },

    /// Explicit wait, one of three shapes.
    Wait(WaitFor),

    /// Readiness step injected by the queue when implicit waiting is on.
    /// Waits for the selector when present, document readiness otherwise.
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },

    /// Focus the first element matching a selector.
    Focus { selector: String },

    /// Press a key by virtual key code, optionally repeated.
    Press {
        key_code: u32,
        #[serde(default = "default_press_count")]
        count: u32,
        /// Modifier bitmask: 1 = Alt, 2 = Ctrl, 4 = Meta, 8 = Shift.
        #[serde(default)]
        modifiers: u32,
    },

    /// Type text, focusing the selector first when one is given.
    Type {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },

    /// Dispatch a mouse-down on the center of a matching element.
    MouseDown { selector: String },

    /// Dispatch a mouse-up on the center of a matching element.
    MouseUp { selector: String },

    /// Scroll the document to absolute coordinates.
    Scroll { x: i64, y: i64 },

    /// Scroll the first matching element into view.
    ScrollToElement { selector: String },

    /// Override viewport metrics.
    SetViewport(Viewport),

    /// Replace the document markup.
    SetHtml { html: String },

    /// Store cookies in the browser's cookie jar.
    SetCookies { cookies: Vec<CookieInput> },

    /// Delete cookies matching a name under a URL.
    DeleteCookies {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// Drop every cookie in the jar.
    ClearCookies,

    /// Clear the network cache.
    ClearCache,

    /// Empty the value of a matching input element.
    ClearInput { selector: String },

    /// Evaluate a JavaScript expression and return its value.
    Evaluate {
        expression: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
    },

    /// Return the `value` property of a matching input element.
    InputValue { selector: String },

    /// Return whether any element matches the selector.
    Exists { selector: String },

    /// Capture a PNG screenshot; resolves with the written file path.
    Screenshot,

    /// Return the full document markup.
    Html,

    /// Render the page to PDF; resolves with the written file path.
    Pdf(PdfOptions),

    /// Return cookies for the current page, optionally filtered by name.
    Cookies {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Return every cookie in the jar.
    AllCookies,
}

fn default_press_count() -> u32 {
    1
}

impl Command {
    /// Whether this command resolves to a value delivered to the caller.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Self::Evaluate { .. }
                | Self::InputValue { .. }
                | Self::Exists { .. }
                | Self::Screenshot
                | Self::Html
                | Self::Pdf(_)
                | Self::Cookies { .. }
                | Self::AllCookies
        )
    }

    /// Whether this command is itself a wait primitive. The queue never
    /// injects a readiness step in front of these.
    pub fn is_wait(&self) -> bool {
        matches!(self, Self::Wait(_) | Self::Ready { .. })
    }

    /// The selector a readiness step should wait on before this command
    /// runs. `None` for commands that do not target an element; `Exists`
    /// deliberately returns `None` so its negative answer stays reachable.
    pub fn target_selector(&self) -> Option<&str> {
        match self {
            Self::Click { selector }
            | Self::Focus { selector }
            | Self::MouseDown { selector }
            | Self::MouseUp { selector }
            | Self::ScrollToElement { selector }
            | Self::ClearInput { selector }
            | Self::InputValue { selector } => Some(selector),
            Self::Type { selector, .. } => selector.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goto { url } => write!(f, "goto({url})"),
            Self::SetUserAgent { .. } => write!(f, "set_user_agent"),
            Self::Click { selector } => write!(f, "click({selector})"),
            Self::Wait(wait) => write!(f, "wait({wait})"),
            Self::Ready { selector } => match selector {
                Some(s) => write!(f, "ready({s})"),
                None => write!(f, "ready"),
            },
            Self::Focus { selector } => write!(f, "focus({selector})"),
            Self::Press { key_code, count, .. } => {
                write!(f, "press(key_code={key_code}, count={count})")
            },
            Self::Type { selector, .. } => match selector {
                Some(s) => write!(f, "type({s})"),
                None => write!(f, "type"),
            },
            Self::MouseDown { selector } => write!(f, "mouse_down({selector})"),
            Self::MouseUp { selector } => write!(f, "mouse_up({selector})"),
            Self::Scroll { x, y } => write!(f, "scroll(x={x}, y={y})"),
            Self::ScrollToElement { selector } => write!(f, "scroll_to_element({selector})"),
            Self::SetViewport(v) => write!(f, "set_viewport({}x{})", v.width, v.height),
            Self::SetHtml { .. } => write!(f, "set_html"),
            Self::SetCookies { cookies } => write!(f, "set_cookies(n={})", cookies.len()),
            Self::DeleteCookies { name, .. } => write!(f, "delete_cookies({name})"),
            Self::ClearCookies => write!(f, "clear_cookies"),
            Self::ClearCache => write!(f, "clear_cache"),
            Self::ClearInput { selector } => write!(f, "clear_input({selector})"),
            Self::Evaluate { .. } => write!(f, "evaluate"),
            Self::InputValue { selector } => write!(f, "input_value({selector})"),
            Self::Exists { selector } => write!(f, "exists({selector})"),
            Self::Screenshot => write!(f, "screenshot"),
            Self::Html => write!(f, "html"),
            Self::Pdf(_) => write!(f, "pdf"),
            Self::Cookies { name } => match name {
                Some(n) => write!(f, "cookies({n})"),
                None => write!(f, "cookies"),
            },
            Self::AllCookies => write!(f, "all_cookies"),
        }
    }
}

/// The three shapes of an explicit wait.
///
/// Built from the caller's argument via `From`/[`WaitFor::predicate`], so
/// unsupported argument kinds are rejected at the call boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitFor {
    /// Pause for a fixed duration.
    Timeout { timeout_ms: u64 },

    /// Block until an element matches the selector, bounded by the
    /// configured wait timeout.
    Selector { selector: String },

    /// Block until the JavaScript predicate returns truthy, bounded by the
    /// configured wait timeout.
    Predicate {
        expression: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
    },
}

impl WaitFor {
    /// Wait until `expression`, applied to `args` in the page, is truthy.
    pub fn predicate(expression: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self::Predicate { expression: expression.into(), args }
    }
}

impl From<Duration> for WaitFor {
    fn from(duration: Duration) -> Self {
        Self::Timeout { timeout_ms: duration.as_millis() as u64 }
    }
}

impl From<u64> for WaitFor {
    fn from(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }
}

impl From<&str> for WaitFor {
    fn from(selector: &str) -> Self {
        Self::Selector { selector: selector.to_string() }
    }
}

impl From<String> for WaitFor {
    fn from(selector: String) -> Self {
        Self::Selector { selector }
    }
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => write!(f, "{timeout_ms}ms"),
            Self::Selector { selector } => write!(f, "{selector}"),
            Self::Predicate { args, .. } => write!(f, "predicate(args={})", args.len()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_command_serializes_with_action_tag() {
        let cmd = Command::Goto { url: "https://example.com".into() };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"action": "goto", "url": "https://example.com"}));
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::Type { text: "hello".into(), selector: Some("#q".into()) };
        let value = serde_json::to_value(&cmd).unwrap();
        let back: Command = serde_json::from_value(value).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_wait_shapes_serialize_distinctly() {
        let timeout = serde_json::to_value(Command::Wait(WaitFor::Timeout { timeout_ms: 5000 })).unwrap();
        assert_eq!(timeout, json!({"action": "wait", "timeout_ms": 5000}));

        let selector = serde_json::to_value(Command::Wait(WaitFor::Selector { selector: "#id".into() })).unwrap();
        assert_eq!(selector, json!({"action": "wait", "selector": "#id"}));

        let predicate = serde_json::to_value(Command::Wait(WaitFor::predicate(
            "(a, b) => a < b",
            vec![json!(1), json!(2)],
        )))
        .unwrap();
        assert_eq!(
            predicate,
            json!({"action": "wait", "expression": "(a, b) => a < b", "args": [1, 2]})
        );
    }

    #[test]
    fn test_wait_for_conversions() {
        assert_eq!(
            WaitFor::from(Duration::from_secs(5)),
            WaitFor::Timeout { timeout_ms: 5000 }
        );
        assert_eq!(WaitFor::from(250u64), WaitFor::Timeout { timeout_ms: 250 });
        assert_eq!(WaitFor::from("#id"), WaitFor::Selector { selector: "#id".into() });
        assert_eq!(
            WaitFor::from(String::from(".btn")),
            WaitFor::Selector { selector: ".btn".into() }
        );
    }

    #[test]
    fn test_query_partition() {
        let queries = [
            Command::Evaluate { expression: "1 + 1".into(), args: vec![] },
            Command::InputValue { selector: "#q".into() },
            Command::Exists { selector: "#q".into() },
            Command::Screenshot,
            Command::Html,
            Command::Pdf(PdfOptions::default()),
            Command::Cookies { name: None },
            Command::AllCookies,
        ];
        for cmd in &queries {
            assert!(cmd.is_query(), "{cmd} should be a query");
        }

        let actions = [
            Command::Goto { url: "https://example.com".into() },
            Command::Click { selector: "#btn".into() },
            Command::Wait(WaitFor::Timeout { timeout_ms: 1 }),
            Command::Ready { selector: None },
            Command::ClearCookies,
        ];
        for cmd in &actions {
            assert!(!cmd.is_query(), "{cmd} should be an action");
        }
    }

    #[test]
    fn test_wait_primitives_marked() {
        assert!(Command::Wait(WaitFor::Timeout { timeout_ms: 1 }).is_wait());
        assert!(Command::Ready { selector: Some("#x".into()) }.is_wait());
        assert!(!Command::Click { selector: "#x".into() }.is_wait());
    }

    #[test]
    fn test_target_selector() {
        assert_eq!(
            Command::Click { selector: "#btn".into() }.target_selector(),
            Some("#btn")
        );
        assert_eq!(
            Command::Type { text: "x".into(), selector: Some("#q".into()) }.target_selector(),
            Some("#q")
        );
        assert_eq!(
            Command::Type { text: "x".into(), selector: None }.target_selector(),
            None
        );
        // exists() must still be able to answer false.
        assert_eq!(Command::Exists { selector: "#q".into() }.target_selector(), None);
        assert_eq!(Command::Html.target_selector(), None);
    }

    #[test]
    fn test_pdf_defaults_serialize_to_bare_tag() {
        let value = serde_json::to_value(Command::Pdf(PdfOptions::default())).unwrap();
        assert_eq!(value, json!({"action": "pdf"}));
    }

    #[test]
    fn test_press_count_defaults_on_deserialize() {
        let cmd: Command = serde_json::from_value(json!({"action": "press", "key_code": 13})).unwrap();
        assert_eq!(cmd, Command::Press { key_code: 13, count: 1, modifiers: 0 });
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Command::Goto { url: "https://example.com".into() }.to_string(),
            "goto(https://example.com)"
        );
        assert_eq!(
            Command::Wait(WaitFor::Selector { selector: "#id".into() }).to_string(),
            "wait(#id)"
        );
        assert_eq!(Command::Ready { selector: None }.to_string(), "ready");
        assert_eq!(Command::AllCookies.to_string(), "all_cookies");
    }
}
