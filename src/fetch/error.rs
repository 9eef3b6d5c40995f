//! Fetch failures. Every retrieval returns one of these instead of panicking or unwinding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    #[error("Rendering failed for {url}: {reason}")]
    Render { url: String, reason: String },

    #[error("Rendering is disabled; cannot render {url}")]
    RenderDisabled { url: String },
}
