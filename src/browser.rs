use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::error::ExtractError;
use crate::extractor::RenderedTier;
use crate::fetcher::USER_AGENT;
use crate::models::SelectorDescriptor;
use crate::parser;

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(20);
pub const SETTLE_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub navigation_timeout: Duration,
    /// Always waited in full after navigation so client-side rendering can finish.
    pub settle_delay: Duration,
    pub sandbox: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: NAVIGATION_TIMEOUT,
            settle_delay: SETTLE_DELAY,
            sandbox: false,
        }
    }
}

/// Browser tier. Every call launches its own headless Chrome and tears it
/// down afterwards; nothing is shared between calls.
pub struct RenderedExtractor {
    settings: RenderSettings,
}

impl RenderedExtractor {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    fn launch(&self) -> Result<BrowserSession, ExtractError> {
        let args = vec![
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-dev-shm-usage"),
        ];
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.settings.sandbox)
            .args(args)
            .build()
            .map_err(|e| ExtractError::Render(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| ExtractError::Render(e.to_string()))?;
        let tab = browser.new_tab().map_err(|e| ExtractError::Render(e.to_string()))?;
        Ok(BrowserSession { _browser: browser, tab })
    }

    fn render_and_extract(&self, url: &str, selector: &SelectorDescriptor) -> Result<f64, ExtractError> {
        let tag = parser::validate_tag(&selector.tag)?;
        let session = self.launch()?;
        let tab = &session.tab;

        tab.set_default_timeout(self.settings.navigation_timeout);
        tab.set_user_agent(USER_AGENT, None, None)
            .map_err(|e| ExtractError::Render(e.to_string()))?;
        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| ExtractError::Render(format!("navigation to {} failed: {}", url, e)))?;

        std::thread::sleep(self.settings.settle_delay);

        let css = class_css_selector(&selector.class_name).ok_or(ExtractError::NotFound)?;
        let elements = match tab.find_elements(&css) {
            Ok(elements) => elements,
            Err(e) => {
                tracing::debug!("no elements for {} on {}: {}", css, url, e);
                return Err(ExtractError::NotFound);
            }
        };

        let element = first_with_tag(elements.iter().map(|el| (el.tag_name.as_str(), el)), tag)
            .ok_or(ExtractError::NotFound)?;
        let text = element
            .get_inner_text()
            .map_err(|e| ExtractError::Render(e.to_string()))?;

        parser::parse_price(&text)
    }
}

impl Default for RenderedExtractor {
    fn default() -> Self {
        Self::new(RenderSettings::default())
    }
}

impl RenderedTier for RenderedExtractor {
    fn extract(&self, url: &str, selector: &SelectorDescriptor) -> Option<f64> {
        match self.render_and_extract(url, selector) {
            Ok(price) => Some(price),
            Err(ExtractError::NotFound) => {
                tracing::info!("[browser] no {} element with class {:?} on {}", selector.tag, selector.class_name, url);
                None
            }
            Err(ExtractError::Parse { text }) => {
                tracing::warn!("[browser] unparseable price {:?} on {}", text, url);
                None
            }
            Err(e) => {
                tracing::error!("[browser] {}: {}", url, e);
                None
            }
        }
    }
}

/// Owns the browser process for one extraction. Dropping it closes the tab
/// and the browser; close failures are logged, never raised.
struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            tracing::warn!("[browser] failed to close tab: {}", e);
        }
        // `_browser` drops after this, killing the Chrome process.
    }
}

/// `"price big"` becomes `.price.big`: every class must be present, in any
/// order, which is the rule the static tier applies too. Characters outside
/// `[A-Za-z0-9_-]` are escaped.
pub fn class_css_selector(class_name: &str) -> Option<String> {
    let mut css = String::new();
    for class in class_name.split_whitespace() {
        css.push('.');
        for c in class.chars() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
                css.push(c);
            } else {
                css.push('\\');
                css.push(c);
            }
        }
    }
    if css.is_empty() { None } else { Some(css) }
}

/// First candidate, in document order, whose tag matches case-insensitively.
pub fn first_with_tag<'a, T>(
    mut candidates: impl Iterator<Item = (&'a str, T)>,
    tag: &str,
) -> Option<T> {
    let tag = tag.trim();
    candidates.find(|(name, _)| name.eq_ignore_ascii_case(tag)).map(|(_, item)| item)
}
