//! Session authentication
//!
//! One browser session is authenticated once per run and reused for every
//! dataset. Failure here is fatal for the run and never retried.

use crate::browser::wait::{wait_for_visible, wait_until};
use crate::browser::{keys, BrowserError, BrowserSession, Locator};
use crate::config::Timings;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Login form username field
pub const USERNAME_FIELD: Locator = Locator::id("id_auth-username");

/// Login form password field
pub const PASSWORD_FIELD: Locator = Locator::id("id_auth-password");

/// Submit button of the form holding the username field
pub const LOGIN_SUBMIT: Locator =
    Locator::xpath("//form[.//input[@id='id_auth-username']]//button[@type='submit']");

/// Export form present on every export page once logged in
pub const EXPORT_FORM: Locator = Locator::id("download-export-form");

/// URL fragment identifying the login page
pub const LOGIN_PATH_MARKER: &str = "/login";

/// Default credentials file
pub const DEFAULT_ENV_FILE: &str = "id_cc.env";

const EMAIL_VAR: &str = "EMAIL";
const PASSWORD_VARS: [&str; 2] = ["PASSWORD", "PASSWORD_CC"];

/// Authentication errors. All of them abort the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Required credential variables are absent
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The credentials file exists but cannot be read
    #[error("cannot read credentials file {path}: {source}")]
    EnvFile {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The login form never appeared
    #[error("login form not found within {0:?}")]
    LoginFormNotFound(Duration),

    /// Neither the redirect nor the export form appeared after submitting
    #[error("authentication not confirmed within {waited:?}")]
    NotConfirmed {
        /// Time spent waiting for confirmation
        waited: Duration,
    },

    /// Browser failure during login
    #[error("browser error during login: {0}")]
    Browser(#[from] BrowserError),
}

/// Login credentials
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Credentials from explicit values.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: password.into().trim().to_string(),
        }
    }

    /// Account email
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Resolve credentials from the process environment and an optional env file.
    ///
    /// Process variables take precedence. A missing env file is not an error.
    pub fn load(env_file: Option<&Path>) -> Result<Self, AuthError> {
        let file_vars = match env_file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(contents) => {
                    debug!(path = %path.display(), "Loaded credentials file");
                    parse_env_file(&contents)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Credentials file not found");
                    HashMap::new()
                }
                Err(source) => {
                    return Err(AuthError::EnvFile {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            },
            None => HashMap::new(),
        };

        Self::resolve(|key| std::env::var(key).ok(), &file_vars)
    }

    /// Resolve from a variable lookup, falling back to `file_vars`.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        file_vars: &HashMap<String, String>,
    ) -> Result<Self, AuthError> {
        let get = |key: &str| {
            lookup(key)
                .or_else(|| file_vars.get(key).cloned())
                .filter(|value| !value.trim().is_empty())
        };

        let email = get(EMAIL_VAR)
            .ok_or_else(|| AuthError::MissingCredentials(format!("{EMAIL_VAR} is not set")))?;
        let password = PASSWORD_VARS.iter().find_map(|&key| get(key)).ok_or_else(|| {
            AuthError::MissingCredentials(format!("{} is not set", PASSWORD_VARS.join(" or ")))
        })?;

        Ok(Self::new(email, password))
    }
}

/// Parse `KEY=VALUE` lines. Blank lines, comments, and `export ` prefixes are handled.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Log in through the form on `landing_url`.
///
/// Succeeds once the browser has left the login page or the export form is
/// present, whichever comes first.
pub async fn authenticate(
    session: &dyn BrowserSession,
    credentials: &Credentials,
    landing_url: &str,
    timings: &Timings,
) -> Result<(), AuthError> {
    info!(url = landing_url, email = credentials.email(), "Authenticating");
    session.navigate(landing_url).await?;

    let username = wait_for_visible(
        session,
        &USERNAME_FIELD,
        timings.login_form_timeout,
        timings.ui_poll_interval,
    )
    .await
    .map_err(|e| form_error(e, timings.login_form_timeout))?;
    let password = wait_for_visible(
        session,
        &PASSWORD_FIELD,
        timings.login_form_timeout,
        timings.ui_poll_interval,
    )
    .await
    .map_err(|e| form_error(e, timings.login_form_timeout))?;

    session.fill(&username, &credentials.email).await?;
    session.fill(&password, &credentials.password).await?;

    match session.find_element(&LOGIN_SUBMIT).await {
        Ok(button) => {
            session.scroll_into_view(&button).await?;
            if let Err(e) = session.click(&button).await {
                warn!(error = %e, "Login button click failed");
            }
        }
        Err(e) => warn!(error = %e, "Login button not found"),
    }

    let left_login = wait_until(
        "redirect away from login",
        timings.login_redirect_grace,
        timings.ui_poll_interval,
        move || async move {
            let url = session.current_url().await?;
            Ok((!url.contains(LOGIN_PATH_MARKER)).then_some(()))
        },
    )
    .await;
    if left_login.is_err() {
        debug!("Still on login page, submitting with Enter");
        session.send_keys(&password, keys::ENTER).await?;
    }

    let confirmed = wait_until(
        "post-login page",
        timings.login_confirm_timeout,
        timings.ui_poll_interval,
        move || async move {
            let url = session.current_url().await?;
            if !url.contains(LOGIN_PATH_MARKER) {
                return Ok(Some(()));
            }
            let forms = session.find_elements(&EXPORT_FORM).await?;
            Ok((!forms.is_empty()).then_some(()))
        },
    )
    .await;

    match confirmed {
        Ok(()) => {
            info!("Authentication succeeded");
            Ok(())
        }
        Err(BrowserError::Timeout { waited, .. }) => Err(AuthError::NotConfirmed { waited }),
        Err(e) => Err(e.into()),
    }
}

fn form_error(error: BrowserError, ceiling: Duration) -> AuthError {
    match error {
        BrowserError::Timeout { .. } => AuthError::LoginFormNotFound(ceiling),
        other => AuthError::Browser(other),
    }
}
