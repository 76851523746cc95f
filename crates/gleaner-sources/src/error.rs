use thiserror::Error;

/// Failures inside a source. The pipeline-facing traits swallow these into
/// empty results after logging them.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported content type: {0}")]
    ContentType(String),
}
