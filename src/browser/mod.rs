//! Browser capability abstraction
//!
//! The download trigger and login flow only need a handful of operations on a
//! live browser page. [`BrowserSession`] names them; [`webdriver`] provides
//! the production implementation and tests substitute a scripted fake.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

pub mod wait;
pub mod webdriver;

/// Special keys, encoded as WebDriver key codepoints
pub mod keys {
    /// Tab
    pub const TAB: &str = "\u{E004}";
    /// Return
    pub const ENTER: &str = "\u{E007}";
    /// Escape
    pub const ESCAPE: &str = "\u{E00C}";
    /// Control modifier
    pub const CONTROL: &str = "\u{E009}";
    /// Delete
    pub const DELETE: &str = "\u{E017}";
}

/// Element location strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Element id attribute
    Id(Cow<'static, str>),
    /// CSS selector
    Css(Cow<'static, str>),
    /// XPath expression
    XPath(Cow<'static, str>),
    /// Tag name
    Tag(Cow<'static, str>),
}

impl Locator {
    /// Locate by id.
    pub const fn id(value: &'static str) -> Self {
        Locator::Id(Cow::Borrowed(value))
    }

    /// Locate by CSS selector.
    pub const fn css(value: &'static str) -> Self {
        Locator::Css(Cow::Borrowed(value))
    }

    /// Locate by XPath.
    pub const fn xpath(value: &'static str) -> Self {
        Locator::XPath(Cow::Borrowed(value))
    }

    /// Locate by tag name.
    pub const fn tag(value: &'static str) -> Self {
        Locator::Tag(Cow::Borrowed(value))
    }

    /// Selector text
    pub fn value(&self) -> &str {
        match self {
            Locator::Id(v) | Locator::Css(v) | Locator::XPath(v) | Locator::Tag(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(v) => write!(f, "id={v}"),
            Locator::Css(v) => write!(f, "css={v}"),
            Locator::XPath(v) => write!(f, "xpath={v}"),
            Locator::Tag(v) => write!(f, "tag={v}"),
        }
    }
}

/// Opaque reference to an element on the current page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    /// Create a handle from a driver-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Driver-assigned id
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Browser layer errors
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// Transport failure talking to the driver
    #[error("HTTP error: {0}")]
    Http(String),

    /// Driver answered with an error not covered below
    #[error("WebDriver error '{code}': {message}")]
    Protocol {
        /// W3C error code
        code: String,
        /// Driver message
        message: String,
    },

    /// No element matched the locator
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The element was detached from the page
    #[error("stale element reference")]
    StaleElement,

    /// Another element received the click
    #[error("element click intercepted: {0}")]
    ClickIntercepted(String),

    /// A bounded wait elapsed
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// Condition description
        what: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// The driver refused to start a session
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    /// Response shape not understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BrowserError {
    /// Whether a wait loop should keep polling after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::NoSuchElement(_) | BrowserError::StaleElement
        )
    }

    /// Whether a click failed because the target moved or was covered.
    pub fn is_click_race(&self) -> bool {
        matches!(
            self,
            BrowserError::StaleElement | BrowserError::ClickIntercepted(_)
        )
    }
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// One live, single-tab browser session
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in the current tab.
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// URL of the current page
    async fn current_url(&self) -> BrowserResult<String>;

    /// All elements matching `locator`; empty when none match.
    async fn find_elements(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>>;

    /// Whether the element is rendered visibly.
    async fn is_displayed(&self, element: &ElementHandle) -> BrowserResult<bool>;

    /// Whether the element accepts interaction.
    async fn is_enabled(&self, element: &ElementHandle) -> BrowserResult<bool>;

    /// Native click.
    async fn click(&self, element: &ElementHandle) -> BrowserResult<()>;

    /// Clear a text input.
    async fn clear(&self, element: &ElementHandle) -> BrowserResult<()>;

    /// Type text (may contain [`keys`] codepoints).
    async fn send_keys(&self, element: &ElementHandle, text: &str) -> BrowserResult<()>;

    /// Scroll the element to the middle of the viewport.
    async fn scroll_into_view(&self, element: &ElementHandle) -> BrowserResult<()>;

    /// Click through script, bypassing overlays.
    async fn js_click(&self, element: &ElementHandle) -> BrowserResult<()>;

    /// HTML source of the current page
    async fn page_source(&self) -> BrowserResult<String>;

    /// End the session and release the browser.
    async fn close(&self) -> BrowserResult<()>;

    /// First element matching `locator`.
    async fn find_element(&self, locator: &Locator) -> BrowserResult<ElementHandle> {
        self.find_elements(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
    }

    /// Clear an input and type `text` into it.
    async fn fill(&self, element: &ElementHandle, text: &str) -> BrowserResult<()> {
        self.clear(element).await?;
        self.send_keys(element, text).await
    }
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser that downloads into the configured directory.
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}
