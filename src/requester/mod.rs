//! Requester module: the single channel for remote calls
//!
//! This module contains:
//! - HTTP client construction and the serialized [`Requester`]
//! - `Retry-After` parsing and the pacing watermark
//! - Classification of responses into [`RequestError`] kinds

mod client;
mod error;
mod pacing;

pub use client::{
    build_http_client, ApiRequest, ApiResponse, Credentials, RequestResult, Requester,
};
pub use error::{classify_response, ErrorKind, RequestError};
pub use pacing::{backoff_delay, parse_retry_after, Pacing};

use crate::FeedpaceError;
use url::Url;

/// Joins an API base URL and a path such as `/browse/newest`
///
/// # Arguments
///
/// * `base` - Base URL, with or without a trailing slash
/// * `path` - Path appended to the base's path
pub fn endpoint_url(base: &str, path: &str) -> Result<Url, FeedpaceError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

/// Appends a target identifier as one percent-encoded path segment
pub fn target_url(endpoint: &Url, target: &str) -> Result<Url, FeedpaceError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| FeedpaceError::UrlParse(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push(target);
    Ok(url)
}
