use scraper::{ElementRef, Html, Selector};

use crate::error::ExtractError;
use crate::models::SelectorDescriptor;

const CURRENCY_PREFIX: &str = "R$";

/// Turns scraped text like `"R$ 19,90"` into `19.9`.
///
/// Brazilian formatting: comma is the decimal separator and no thousands
/// separator is expected, so `"1.234,56"` is rejected.
pub fn parse_price(raw: &str) -> Result<f64, ExtractError> {
    let cleaned = raw
        .trim()
        .replace(CURRENCY_PREFIX, "")
        .replace(',', ".");
    let cleaned = cleaned.trim();

    let fail = || ExtractError::Parse {
        text: raw.trim().to_string(),
    };

    let price: f64 = cleaned.parse().map_err(|_| fail())?;
    if !price.is_finite() || price < 0.0 {
        return Err(fail());
    }
    Ok(price)
}

/// Accepts a bare element name (`span`, `my-price`) and nothing else, so a
/// stored tag can't smuggle in combinators, ids or extra classes.
pub fn validate_tag(tag: &str) -> Result<&str, ExtractError> {
    let tag = tag.trim();
    let mut chars = tag.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(ExtractError::Selector(format!("not an element name: {:?}", tag)));
    }
    Ok(tag)
}

/// Text of the first element (document order) with the given tag and class.
pub fn find_price_text(doc: &Html, selector: &SelectorDescriptor) -> Result<Option<String>, ExtractError> {
    let tag = validate_tag(&selector.tag)?;
    let tag_selector =
        Selector::parse(tag).map_err(|e| ExtractError::Selector(format!("{}: {}", tag, e)))?;

    Ok(doc
        .select(&tag_selector)
        .find(|el| has_class(el, &selector.class_name))
        .map(|el| el.text().collect::<String>()))
}

/// Static-tier lookup over a fetched body. A missing element and an
/// unparseable one both come back as `NotFound`.
pub fn extract_price_from_html(html: &str, selector: &SelectorDescriptor) -> Result<f64, ExtractError> {
    let doc = Html::parse_document(html);
    let text = find_price_text(&doc, selector)?.ok_or(ExtractError::NotFound)?;

    parse_price(&text).map_err(|e| {
        tracing::debug!("static tier matched {:?} but {}", text.trim(), e);
        ExtractError::NotFound
    })
}

// Every whitespace-separated name must be on the element, in any order,
// same as the `.a.b` selector the browser tier builds.
fn has_class(el: &ElementRef, class_name: &str) -> bool {
    let mut wanted = class_name.split_whitespace().peekable();
    if wanted.peek().is_none() {
        return false;
    }
    wanted.all(|name| el.value().classes().any(|c| c == name))
}
