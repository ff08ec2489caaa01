//! Bounded polling waits on page conditions
//!
//! Every wait has a ceiling. Missing and stale elements count as "not yet";
//! any other browser error ends the wait immediately.

use super::{BrowserError, BrowserResult, BrowserSession, ElementHandle, Locator};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `probe` every `poll` until it yields a value or `timeout` elapses.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut probe: F,
) -> BrowserResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_transient() => {}
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BrowserError::Timeout {
                what: what.to_string(),
                waited: now - started,
            });
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// Wait for an element matching `locator` to exist.
pub async fn wait_for_present(
    session: &dyn BrowserSession,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<ElementHandle> {
    let what = format!("{locator} to be present");
    wait_until(&what, timeout, poll, move || async move {
        Ok(session.find_elements(locator).await?.into_iter().next())
    })
    .await
}

/// Wait for an element matching `locator` to be displayed.
pub async fn wait_for_visible(
    session: &dyn BrowserSession,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<ElementHandle> {
    let what = format!("{locator} to be visible");
    wait_until(&what, timeout, poll, move || async move {
        for element in session.find_elements(locator).await? {
            if session.is_displayed(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    })
    .await
}

/// Wait for an element matching `locator` to be displayed and enabled.
pub async fn wait_for_clickable(
    session: &dyn BrowserSession,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<ElementHandle> {
    let what = format!("{locator} to be clickable");
    wait_until(&what, timeout, poll, move || async move {
        for element in session.find_elements(locator).await? {
            if session.is_displayed(&element).await? && session.is_enabled(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    })
    .await
}

/// Try each locator in order, giving each `per_locator` to become clickable.
///
/// Returns the element and the locator that found it.
pub async fn first_clickable<'a>(
    session: &dyn BrowserSession,
    locators: &'a [Locator],
    per_locator: Duration,
    poll: Duration,
) -> BrowserResult<(ElementHandle, &'a Locator)> {
    let mut last_error = None;
    for locator in locators {
        match wait_for_clickable(session, locator, per_locator, poll).await {
            Ok(element) => return Ok((element, locator)),
            Err(e @ BrowserError::Timeout { .. }) => {
                tracing::debug!(%locator, "Locator did not yield a clickable element");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| BrowserError::NoSuchElement("no locators given".to_string())))
}
