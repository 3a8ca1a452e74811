use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect;

use crate::error::ExtractError;
use crate::extractor::{StaticOutcome, StaticTier};
use crate::models::SelectorDescriptor;
use crate::parser;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 10;

/// Plain HTTP tier: GET the page and look for the selector in the raw HTML.
pub struct StaticExtractor {
    client: Client,
}

impl StaticExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ExtractError> {
        let redirect_policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error(format!("Too many redirects (>{})", MAX_REDIRECTS))
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .redirect(redirect_policy)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn fetch_html(&self, url: &str) -> Result<String, ExtractError> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            // Blocked pages still get parsed; they just won't hold the price.
            tracing::debug!("{} answered {}", url, status);
        }
        Ok(resp.text()?)
    }
}

impl StaticTier for StaticExtractor {
    fn extract(&self, url: &str, selector: &SelectorDescriptor) -> Result<StaticOutcome, ExtractError> {
        let html = self.fetch_html(url)?;
        match parser::extract_price_from_html(&html, selector) {
            Ok(price) => Ok(StaticOutcome::Found(price)),
            Err(ExtractError::NotFound) => Ok(StaticOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
