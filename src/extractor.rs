use crate::error::ExtractError;
use crate::models::SelectorDescriptor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StaticOutcome {
    Found(f64),
    NotFound,
}

/// Cheap tier: plain HTTP fetch and structural parse.
pub trait StaticTier: Send + Sync {
    fn extract(&self, url: &str, selector: &SelectorDescriptor) -> Result<StaticOutcome, ExtractError>;
}

/// Expensive tier: full browser render. Failures are logged by the tier itself.
pub trait RenderedTier: Send + Sync {
    fn extract(&self, url: &str, selector: &SelectorDescriptor) -> Option<f64>;
}

/// Anything that can answer "what does this page say the price is".
/// Callers only ever see a price or no price.
pub trait PriceSource: Send + Sync {
    fn extract_price(&self, url: &str, selector: &SelectorDescriptor) -> Option<f64>;
}

/// Two-tier extraction: try the static tier, and on any static error or
/// miss pay for exactly one rendered attempt.
pub struct PriceExtractor<S, R> {
    static_tier: S,
    rendered_tier: R,
}

impl<S: StaticTier, R: RenderedTier> PriceExtractor<S, R> {
    pub fn new(static_tier: S, rendered_tier: R) -> Self {
        Self {
            static_tier,
            rendered_tier,
        }
    }
}

impl<S: StaticTier, R: RenderedTier> PriceSource for PriceExtractor<S, R> {
    fn extract_price(&self, url: &str, selector: &SelectorDescriptor) -> Option<f64> {
        // Every static failure falls back, not just network ones. That can hide
        // a selector or parsing bug behind "page needs rendering".
        match self.static_tier.extract(url, selector) {
            Ok(StaticOutcome::Found(price)) => {
                tracing::debug!("static tier found {} on {}", price, url);
                return Some(price);
            }
            Ok(StaticOutcome::NotFound) => {
                tracing::info!("price not in static HTML of {}, rendering", url);
            }
            Err(e) => {
                tracing::warn!("static fetch of {} failed ({}), rendering", url, e);
            }
        }
        self.rendered_tier.extract(url, selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStatic {
        result: fn() -> Result<StaticOutcome, ExtractError>,
        calls: AtomicUsize,
    }

    impl StaticTier for FakeStatic {
        fn extract(&self, _url: &str, _selector: &SelectorDescriptor) -> Result<StaticOutcome, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    struct FakeRendered {
        result: Option<f64>,
        calls: AtomicUsize,
    }

    impl RenderedTier for FakeRendered {
        fn extract(&self, _url: &str, _selector: &SelectorDescriptor) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
        }
    }

    fn extractor(
        result: fn() -> Result<StaticOutcome, ExtractError>,
        rendered: Option<f64>,
    ) -> PriceExtractor<FakeStatic, FakeRendered> {
        PriceExtractor::new(
            FakeStatic { result, calls: AtomicUsize::new(0) },
            FakeRendered { result: rendered, calls: AtomicUsize::new(0) },
        )
    }

    fn selector() -> SelectorDescriptor {
        SelectorDescriptor::new("span", "price")
    }

    #[test]
    fn static_hit_skips_browser() {
        let ex = extractor(|| Ok(StaticOutcome::Found(19.9)), Some(1.0));
        assert_eq!(ex.extract_price("http://shop", &selector()), Some(19.9));
        assert_eq!(ex.static_tier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ex.rendered_tier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn static_miss_renders_once() {
        let ex = extractor(|| Ok(StaticOutcome::NotFound), Some(89.0));
        assert_eq!(ex.extract_price("http://shop", &selector()), Some(89.0));
        assert_eq!(ex.rendered_tier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn static_error_renders_once() {
        let ex = extractor(|| Err(ExtractError::Selector("bad".into())), None);
        assert_eq!(ex.extract_price("http://shop", &selector()), None);
        assert_eq!(ex.rendered_tier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rendered_result_is_not_mixed_with_static() {
        let ex = extractor(|| Err(ExtractError::Render("boom".into())), Some(10.0));
        assert_eq!(ex.extract_price("http://shop", &selector()), Some(10.0));
    }
}
