use std::sync::Arc;

/// Result type used throughout the crate.
///
/// Note that most resolution failures are not surfaced through this type: per the
/// degradation policy, a scope that cannot be resolved simply stays inactive and the
/// failure is logged. `Error` is reserved for operations where the caller asked for
/// something specific (fetching a fragment or a manifest) and needs to know it
/// didn't happen.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching or splicing content.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A configured content URL could not be parsed or resolved against the request URL.
    #[error("invalid content url")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status.
    #[error("unexpected http status: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The manifest document is not shaped like a manifest.
    #[error("malformed manifest: {0}")]
    ManifestFormat(String),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
