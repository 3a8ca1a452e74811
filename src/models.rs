use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a price lives in the DOM: a tag name plus one CSS class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorDescriptor {
    pub tag: String,
    #[serde(rename = "class")]
    pub class_name: String,
}

impl SelectorDescriptor {
    pub fn new(tag: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            class_name: class_name.into(),
        }
    }
}

/// One timestamped price reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }

    pub fn now(price: f64) -> Self {
        Self::new(Utc::now(), price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub url: String,
    pub selector: SelectorDescriptor,
    /// Append-only, in insertion order.
    pub price_history: Vec<Observation>,
}

impl Product {
    /// A new product always starts with its seed observation.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        selector: SelectorDescriptor,
        seed: Observation,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            selector,
            price_history: vec![seed],
        }
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.price_history.last()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.price_history.iter().map(|o| o.price).collect()
    }
}
