//! The fluent command chain.

use std::{future::IntoFuture, marker::PhantomData, path::PathBuf};

use {
    futures::future::BoxFuture,
    serde::de::DeserializeOwned,
    serde_json::Value,
    tokio::sync::oneshot,
};

use {
    tiller_driver::{AttachSpec, LaunchSpec, LocalDriver, RemoteDriver},
    tiller_protocol::{
        Command, Cookie, CookieInput, Driver, Error, PdfOptions, Result, Viewport, WaitFor,
    },
};

use crate::{config::Options, queue::CommandQueue};

/// A fluent browser session.
///
/// Methods queue commands and return immediately; nothing talks to the
/// browser until the queue gets there, and nothing connects at all until
/// the first command runs. Awaiting the chain resolves the most recent
/// query's value once the queue reaches it, or drains the queue when no
/// query was issued. [`Chain::end`] runs the whole queue down and then
/// releases the browser.
///
/// The type parameter tracks what awaiting resolves to: `Chain<()>` until
/// the first query, the query's result type after it.
#[derive(Debug)]
pub struct Chain<T> {
    queue: CommandQueue,
    pending: Pending,
    marker: PhantomData<fn() -> T>,
}

/// What awaiting the chain waits on.
#[derive(Debug)]
enum Pending {
    /// No query yet; awaiting just drains the queue.
    Queue,
    /// The reply slot of the most recent query.
    Query(oneshot::Receiver<Result<Value>>),
}

impl Chain<()> {
    /// Start a chain. Synchronous and infallible; launch or attach
    /// problems surface from the first awaited command instead.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(options: Options) -> Self {
        let driver = build_driver(&options);
        Self::start(driver, &options)
    }

    /// Start a chain on a caller-supplied driver. Used for custom
    /// transports and for tests; the endpoint fields of `options` are
    /// ignored since the driver already embodies them.
    pub fn with_driver(driver: impl Driver + 'static, options: Options) -> Self {
        Self::start(Box::new(driver), &options)
    }

    fn start(driver: Box<dyn Driver>, options: &Options) -> Self {
        let queue = CommandQueue::spawn(driver, options.implicit_wait, options.debug);
        Self { queue, pending: Pending::Queue, marker: PhantomData }
    }
}

/// Pick a transport for the configured endpoint.
///
/// `remote: true` and `launch_chrome: false` both attach to a browser that
/// is already running; everything else launches one.
fn build_driver(options: &Options) -> Box<dyn Driver> {
    let viewport = Some(options.viewport.clone());
    if options.remote || !options.launch_chrome {
        let spec = AttachSpec {
            host: options.cdp.resolved_host(),
            port: options.cdp.resolved_port(),
            secure: options.cdp.secure,
            close_tab: options.cdp.close_tab,
        };
        Box::new(RemoteDriver::new(spec, options.wait_timeout(), viewport))
    } else {
        let spec = LaunchSpec {
            port: options.cdp.launch_port(),
            headless: options.launch.headless,
            chrome_path: options.launch.chrome_path.clone(),
            args: options.launch.args.clone(),
        };
        Box::new(LocalDriver::new(spec, options.wait_timeout(), viewport))
    }
}

impl<T> Chain<T> {
    fn action(self, command: Command) -> Self {
        self.queue.enqueue(command);
        self
    }

    fn query<U>(self, command: Command) -> Chain<U> {
        let reply = self.queue.process(command);
        Chain {
            queue: self.queue,
            pending: Pending::Query(reply),
            marker: PhantomData,
        }
    }

    /// Navigate to a URL and wait for the page to load.
    pub fn goto(self, url: impl Into<String>) -> Self {
        self.action(Command::Goto { url: url.into() })
    }

    /// Override the user agent for the rest of the session.
    pub fn set_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.action(Command::SetUserAgent { user_agent: user_agent.into() })
    }

    /// Click the center of the first element matching `selector`.
    pub fn click(self, selector: impl Into<String>) -> Self {
        self.action(Command::Click { selector: selector.into() })
    }

    /// Block the queue: a `Duration` or millisecond count sleeps, a
    /// selector waits for a match, [`WaitFor::predicate`] waits for a
    /// truthy result.
    pub fn wait(self, wait: impl Into<WaitFor>) -> Self {
        self.action(Command::Wait(wait.into()))
    }

    /// Focus the first element matching `selector`.
    pub fn focus(self, selector: impl Into<String>) -> Self {
        self.action(Command::Focus { selector: selector.into() })
    }

    /// Press a key once by virtual key code (13 for Enter, 9 for Tab).
    pub fn press(self, key_code: u32) -> Self {
        self.press_with(key_code, 1, 0)
    }

    /// Press a key `count` times while holding a modifier bitmask
    /// (1 = Alt, 2 = Ctrl, 4 = Meta, 8 = Shift).
    pub fn press_with(self, key_code: u32, count: u32, modifiers: u32) -> Self {
        self.action(Command::Press { key_code, count, modifiers })
    }

    /// Type text into whatever currently has focus.
    pub fn type_text(self, text: impl Into<String>) -> Self {
        self.action(Command::Type { text: text.into(), selector: None })
    }

    /// Focus the first element matching `selector`, then type into it.
    pub fn type_into(self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.action(Command::Type {
            text: text.into(),
            selector: Some(selector.into()),
        })
    }

    /// Dispatch a mouse-down on the center of a matching element.
    pub fn mouse_down(self, selector: impl Into<String>) -> Self {
        self.action(Command::MouseDown { selector: selector.into() })
    }

    /// Dispatch a mouse-up on the center of a matching element.
    pub fn mouse_up(self, selector: impl Into<String>) -> Self {
        self.action(Command::MouseUp { selector: selector.into() })
    }

    /// Scroll the document to absolute coordinates.
    pub fn scroll_to(self, x: i64, y: i64) -> Self {
        self.action(Command::Scroll { x, y })
    }

    /// Scroll the first matching element into view.
    pub fn scroll_to_element(self, selector: impl Into<String>) -> Self {
        self.action(Command::ScrollToElement { selector: selector.into() })
    }

    /// Change the emulated viewport.
    pub fn set_viewport(self, viewport: Viewport) -> Self {
        self.action(Command::SetViewport(viewport))
    }

    /// Replace the document markup wholesale.
    pub fn set_html(self, html: impl Into<String>) -> Self {
        self.action(Command::SetHtml { html: html.into() })
    }

    /// Store one cookie. A bare name/value pair ([`CookieInput::new`]) is
    /// scoped to the current page URL.
    pub fn set_cookie(self, cookie: CookieInput) -> Self {
        self.set_cookies(vec![cookie])
    }

    /// Store a batch of cookies.
    pub fn set_cookies(self, cookies: Vec<CookieInput>) -> Self {
        self.action(Command::SetCookies { cookies })
    }

    /// Delete cookies by name, under `url` or the current page URL.
    ///
    /// An empty name is a usage error, raised before anything is queued.
    pub fn delete_cookies(self, name: impl Into<String>, url: Option<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::usage("delete_cookies needs a non-empty name"));
        }
        Ok(self.action(Command::DeleteCookies { name, url }))
    }

    /// Drop every cookie in the jar.
    pub fn clear_cookies(self) -> Self {
        self.action(Command::ClearCookies)
    }

    /// Clear the browser's network cache.
    pub fn clear_cache(self) -> Self {
        self.action(Command::ClearCache)
    }

    /// Empty the value of a matching input element.
    pub fn clear_input(self, selector: impl Into<String>) -> Self {
        self.action(Command::ClearInput { selector: selector.into() })
    }

    /// Go back one history entry. Not implemented; fails synchronously.
    pub fn back(self) -> Result<Self> {
        Err(Error::NotImplemented("back"))
    }

    /// Go forward one history entry. Not implemented.
    pub fn forward(self) -> Result<Self> {
        Err(Error::NotImplemented("forward"))
    }

    /// Reload the page. Not implemented.
    pub fn refresh(self) -> Result<Self> {
        Err(Error::NotImplemented("refresh"))
    }

    /// Hover over a matching element. Not implemented.
    pub fn hover(self, _selector: impl Into<String>) -> Result<Self> {
        Err(Error::NotImplemented("hover"))
    }

    /// Query cookies by structured filter. Not implemented; use
    /// [`Chain::cookies_named`] for the name case.
    pub fn cookies_matching(self, _query: Value) -> Result<Chain<Option<Vec<Cookie>>>> {
        Err(Error::NotImplemented("structured cookie queries"))
    }

    /// Evaluate JavaScript in the page and decode its value.
    ///
    /// `expression` may be a plain expression or function source; a
    /// function is applied to the arguments of [`Chain::evaluate_with`].
    pub fn evaluate<U>(self, expression: impl Into<String>) -> Chain<U> {
        self.evaluate_with(expression, Vec::new())
    }

    /// Like [`Chain::evaluate`], passing `args` to the evaluated function.
    pub fn evaluate_with<U>(self, expression: impl Into<String>, args: Vec<Value>) -> Chain<U> {
        self.query(Command::Evaluate { expression: expression.into(), args })
    }

    /// The `value` property of the first matching input element.
    pub fn input_value(self, selector: impl Into<String>) -> Chain<String> {
        self.query(Command::InputValue { selector: selector.into() })
    }

    /// Whether any element matches `selector`. No readiness wait is scoped
    /// to the selector, so a missing element answers `false` instead of
    /// timing out.
    pub fn exists(self, selector: impl Into<String>) -> Chain<bool> {
        self.query(Command::Exists { selector: selector.into() })
    }

    /// Capture a PNG screenshot; resolves to the written file's path.
    pub fn screenshot(self) -> Chain<PathBuf> {
        self.query(Command::Screenshot)
    }

    /// The full document markup.
    pub fn html(self) -> Chain<String> {
        self.query(Command::Html)
    }

    /// Render the page to PDF; resolves to the written file's path.
    pub fn pdf(self, options: PdfOptions) -> Chain<PathBuf> {
        self.query(Command::Pdf(options))
    }

    /// Cookies visible to the current page.
    pub fn cookies(self) -> Chain<Option<Vec<Cookie>>> {
        self.query(Command::Cookies { name: None })
    }

    /// Cookies visible to the current page, filtered by name.
    pub fn cookies_named(self, name: impl Into<String>) -> Chain<Option<Vec<Cookie>>> {
        self.query(Command::Cookies { name: Some(name.into()) })
    }

    /// Every cookie in the jar, regardless of page.
    pub fn all_cookies(self) -> Chain<Option<Vec<Cookie>>> {
        self.query(Command::AllCookies)
    }

    /// Drain the queue, release the browser, and resolve the final value.
    ///
    /// The browser is released even when the chain failed; the first
    /// failure is what comes back.
    pub async fn end(self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let pending = resolve(&self.queue, self.pending).await;
        let ended = self.queue.end().await;
        let value = decode(pending?)?;
        ended?;
        Ok(value)
    }
}

/// Wait for the pending position in the queue and produce its raw value.
async fn resolve(queue: &CommandQueue, pending: Pending) -> Result<Value> {
    match pending {
        Pending::Queue => {
            queue.flush().await?;
            Ok(Value::Null)
        },
        Pending::Query(reply) => match reply.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed(
                "chain ended before its result arrived".into(),
            )),
        },
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::usage(format!("query result does not fit the requested type: {e}")))
}

impl<T> IntoFuture for Chain<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    /// Waits for the pending result, without ending the session.
    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let value = resolve(&self.queue, self.pending).await?;
            decode(value)
        })
    }
}
