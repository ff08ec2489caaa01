//! W3C WebDriver client
//!
//! Talks to a running driver (chromedriver by default) over its HTTP wire
//! protocol. Response decoding is kept in free functions so it can be tested
//! without a driver.

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, ElementHandle, Locator};
use crate::config::calculate_backoff;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key under which W3C drivers serialize element references
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Default driver endpoint
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Script clicks on a download link can block until the export response starts
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 120;
const SESSION_CREATE_RETRIES: u32 = 3;

/// How to launch the browser
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Driver endpoint
    pub webdriver_url: String,
    /// Directory the browser saves downloads into
    pub download_dir: PathBuf,
    /// Run without a visible window
    pub headless: bool,
}

impl BrowserOptions {
    /// Options for a driver at `webdriver_url` downloading into `download_dir`.
    pub fn new(webdriver_url: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            download_dir: download_dir.into(),
            headless: false,
        }
    }

    /// Toggle headless mode.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// New-session capabilities for Chrome.
    pub fn capabilities(&self) -> Value {
        let mut args = vec![
            "--window-size=1920,1080",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ];
        if self.headless {
            args.push("--headless=new");
        }

        let download_dir = absolute(&self.download_dir);
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.to_string_lossy(),
                            "download.prompt_for_download": false,
                            "download.directory_upgrade": true,
                            "safebrowsing.enabled": true
                        }
                    }
                }
            }
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Launches Chrome sessions through a WebDriver endpoint
pub struct WebDriverLauncher {
    client: Arc<Client>,
    options: BrowserOptions,
}

impl WebDriverLauncher {
    /// Build a launcher with its own HTTP client.
    pub fn new(options: BrowserOptions) -> BrowserResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BrowserError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            options,
        })
    }

    /// Launch options
    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let base = self.options.webdriver_url.trim_end_matches('/').to_string();
        let url = format!("{base}/session");
        let body = self.options.capabilities();

        let mut last_error = None;
        for attempt in 0..SESSION_CREATE_RETRIES {
            match send(&self.client, Method::POST, &url, Some(&body)).await {
                Ok(value) => {
                    let session_id = value
                        .get("sessionId")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            BrowserError::InvalidResponse("new session response has no sessionId".into())
                        })?;
                    info!(
                        session_id,
                        headless = self.options.headless,
                        download_dir = %self.options.download_dir.display(),
                        "Browser session started"
                    );
                    return Ok(Box::new(WebDriverSession::new(
                        self.client.clone(),
                        &base,
                        session_id,
                    )));
                }
                Err(e @ BrowserError::Http(_)) => {
                    warn!(
                        "Driver unreachable on attempt {}/{}: {}",
                        attempt + 1,
                        SESSION_CREATE_RETRIES,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < SESSION_CREATE_RETRIES {
                        let backoff =
                            calculate_backoff(Duration::from_secs(1), Duration::from_secs(8), attempt);
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| BrowserError::SessionNotCreated("no attempt made".into())))
    }
}

/// One WebDriver session
pub struct WebDriverSession {
    client: Arc<Client>,
    session_url: String,
    closed: AtomicBool,
}

impl WebDriverSession {
    /// Attach to an existing session.
    pub fn new(client: Arc<Client>, webdriver_url: &str, session_id: &str) -> Self {
        Self {
            client,
            session_url: format!("{}/session/{}", webdriver_url.trim_end_matches('/'), session_id),
            closed: AtomicBool::new(false),
        }
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> BrowserResult<Value> {
        let url = format!("{}{}", self.session_url, path);
        send(&self.client, method, &url, body.as_ref()).await
    }

    async fn element_command(
        &self,
        method: Method,
        element: &ElementHandle,
        action: &str,
        body: Option<Value>,
    ) -> BrowserResult<Value> {
        let path = format!("/element/{}/{}", element.id(), action);
        self.command(method, &path, body).await
    }

    async fn execute(&self, script: &str, element: &ElementHandle) -> BrowserResult<Value> {
        let body = json!({
            "script": script,
            "args": [element_to_value(element)],
        });
        self.command(Method::POST, "/execute/sync", Some(body)).await
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        debug!(url, "Navigating");
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(drop)
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse(format!("URL is not a string: {value}")))
    }

    async fn find_elements(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>> {
        let value = self
            .command(Method::POST, "/elements", Some(locator_to_wire(locator)))
            .await?;
        elements_from_value(&value)
    }

    async fn is_displayed(&self, element: &ElementHandle) -> BrowserResult<bool> {
        let value = self.element_command(Method::GET, element, "displayed", None).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> BrowserResult<bool> {
        let value = self.element_command(Method::GET, element, "enabled", None).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, element: &ElementHandle) -> BrowserResult<()> {
        self.element_command(Method::POST, element, "click", Some(json!({})))
            .await
            .map(drop)
    }

    async fn clear(&self, element: &ElementHandle) -> BrowserResult<()> {
        self.element_command(Method::POST, element, "clear", Some(json!({})))
            .await
            .map(drop)
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> BrowserResult<()> {
        self.element_command(Method::POST, element, "value", Some(json!({ "text": text })))
            .await
            .map(drop)
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> BrowserResult<()> {
        self.execute("arguments[0].scrollIntoView({block: 'center'});", element)
            .await
            .map(drop)
    }

    async fn js_click(&self, element: &ElementHandle) -> BrowserResult<()> {
        self.execute("arguments[0].click();", element).await.map(drop)
    }

    async fn page_source(&self) -> BrowserResult<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> BrowserResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let url = self.session_url.clone();
        send(&self.client, Method::DELETE, &url, None).await?;
        info!("Browser session closed");
        Ok(())
    }
}

async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> BrowserResult<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| BrowserError::Http(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| BrowserError::Http(e.to_string()))?;

    parse_response(status, &text)
}

/// Decode a driver response into its `value` payload or a typed error.
pub fn parse_response(status: u16, body: &str) -> BrowserResult<Value> {
    let parsed: Value = serde_json::from_str(body).map_err(|e| {
        BrowserError::InvalidResponse(format!("HTTP {status}: body is not JSON ({e})"))
    })?;
    let value = parsed.get("value").cloned().unwrap_or(Value::Null);

    if let Some(code) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(error_from_wire(code, message));
    }

    if !(200..300).contains(&status) {
        return Err(BrowserError::Protocol {
            code: format!("http {status}"),
            message: value.to_string(),
        });
    }

    Ok(value)
}

/// Map a W3C error code onto [`BrowserError`].
pub fn error_from_wire(code: &str, message: &str) -> BrowserError {
    match code {
        "no such element" => BrowserError::NoSuchElement(message.to_string()),
        "stale element reference" => BrowserError::StaleElement,
        "element click intercepted" => BrowserError::ClickIntercepted(message.to_string()),
        "session not created" => BrowserError::SessionNotCreated(message.to_string()),
        _ => BrowserError::Protocol {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

/// Extract an element reference from a driver value.
pub fn element_from_value(value: &Value) -> BrowserResult<ElementHandle> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(ElementHandle::new)
        .ok_or_else(|| BrowserError::InvalidResponse(format!("not an element reference: {value}")))
}

fn elements_from_value(value: &Value) -> BrowserResult<Vec<ElementHandle>> {
    value
        .as_array()
        .ok_or_else(|| BrowserError::InvalidResponse(format!("expected an element list: {value}")))?
        .iter()
        .map(element_from_value)
        .collect()
}

fn element_to_value(element: &ElementHandle) -> Value {
    json!({ ELEMENT_KEY: element.id() })
}

/// Locator strategy payload. W3C has no id strategy, so ids go through CSS.
pub fn locator_to_wire(locator: &Locator) -> Value {
    match locator {
        Locator::Id(id) => json!({
            "using": "css selector",
            "value": format!("[id=\"{}\"]", id.replace('"', "\\\"")),
        }),
        Locator::Css(css) => json!({ "using": "css selector", "value": css }),
        Locator::XPath(xpath) => json!({ "using": "xpath", "value": xpath }),
        Locator::Tag(tag) => json!({ "using": "tag name", "value": tag }),
    }
}
