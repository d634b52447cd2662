use thiserror::Error;

/// Pipeline-level error taxonomy. Collaborator traits (fetcher, browser,
/// completion client, store) stay on `anyhow::Result`; the orchestrator maps
/// their failures into these variants at the pipeline boundary.
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("page navigation failed: {0}")]
    Navigation(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("store error: {0}")]
    Store(String),
}
