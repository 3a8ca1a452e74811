use thiserror::Error;

/// Failures inside the extraction path. None of these escape the coordinator.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("no element matched the selector")]
    NotFound,
    #[error("could not parse price from {text:?}")]
    Parse { text: String },
    #[error("invalid selector: {0}")]
    Selector(String),
    #[error("browser error: {0}")]
    Render(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown product: {0}")]
    UnknownProduct(String),
    #[error("invalid price: {0}")]
    InvalidPrice(f64),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config format error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frequency must be between 1 and 24 hours, got {0}")]
    OutOfRange(u32),
}
