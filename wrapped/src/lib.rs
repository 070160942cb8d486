use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub mod spotify;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 50;

/// Time window Spotify uses to rank a user's top items.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// Approximately the last 4 weeks.
    ShortTerm,
    /// Approximately the last 6 months.
    #[default]
    MediumTerm,
    /// Calculated from all time data.
    LongTerm,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;

    /// Accepts both API values (short_term) and enum names (SHORT_TERM).
    fn from_str(s: &str) -> Result<TimeRange, Error> {
        match s.to_ascii_lowercase().as_str() {
            "short_term" => Ok(TimeRange::ShortTerm),
            "medium_term" => Ok(TimeRange::MediumTerm),
            "long_term" => Ok(TimeRange::LongTerm),
            _ => Err(Error::invalid_request(format!(
                "Invalid time range: {s}. Valid values are: short_term, medium_term, long_term"
            ))),
        }
    }
}

/// Labelled, counted, ordered collection of result items returned to the
/// browser. `count` is redundant with `items.len()` but kept for client
/// convenience.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TopItemsEnvelope<T> {
    pub r#type: String,
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> TopItemsEnvelope<T> {
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> TopItemsEnvelope<T> {
        TopItemsEnvelope {
            r#type: kind.into(),
            count: items.len(),
            items,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedResponse {
    pub top_tracks: TopItemsEnvelope<spotify::Track>,
    pub top_artists: TopItemsEnvelope<spotify::Artist>,
    pub top_albums: TopItemsEnvelope<spotify::Album>,
    pub top_genres: TopItemsEnvelope<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HomeResponse {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub message: String,
    #[serde(default, rename = "loginUrl", skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointIndex>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointIndex {
    pub wrapped: String,
    pub top_tracks: String,
    pub top_artists: String,
    pub top_albums: String,
    pub top_genres: String,
    pub logout: String,
}

impl Default for EndpointIndex {
    fn default() -> EndpointIndex {
        EndpointIndex {
            wrapped: String::from("/api/spotify/wrapped"),
            top_tracks: String::from("/api/spotify/top/tracks"),
            top_artists: String::from("/api/spotify/top/artists"),
            top_albums: String::from("/api/spotify/top/albums"),
            top_genres: String::from("/api/spotify/top/genres"),
            logout: String::from("/logout"),
        }
    }
}

/// Standard error body returned for every failed request.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub timestamp: String,
}

pub fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug)]
pub enum Error {
    /// No valid session.
    Unauthenticated,
    /// Bad limit or time-window value.
    InvalidRequest(String),
    /// Token exchange or refresh rejected, or upstream rejected the token.
    UpstreamAuthFailure(String),
    /// Upstream 429; retry_after is the Retry-After header in seconds.
    UpstreamRateLimited { retry_after: Option<u64> },
    /// Upstream network failure or unexpected status.
    UpstreamUnavailable(String),
    InternalError(InternalError),
}

#[derive(Debug)]
pub enum InternalError {
    RequestError(hyper::http::Error),
    JSONError(serde_json::Error),
    Error(String),
}

impl Error {
    pub fn invalid_request(e: impl Into<String>) -> Self {
        Self::InvalidRequest(e.into())
    }

    pub fn upstream_auth(e: impl Into<String>) -> Self {
        Self::UpstreamAuthFailure(e.into())
    }

    pub fn internal_error(e: impl Into<String>) -> Self {
        Self::InternalError(InternalError::Error(e.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthenticated | Error::UpstreamAuthFailure(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "Unauthorized",
            Error::InvalidRequest(_) => "Bad Request",
            Error::UpstreamAuthFailure(_) => "Authentication failed",
            Error::UpstreamRateLimited { .. } => "Too Many Requests",
            Error::UpstreamUnavailable(_) => "Spotify API error",
            Error::InternalError(_) => "Internal server error",
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            Error::Unauthenticated => String::from("Authentication required"),
            Error::InvalidRequest(e) | Error::UpstreamAuthFailure(e) => e.clone(),
            Error::UpstreamRateLimited { .. } => {
                String::from("The Spotify API rate limit was exceeded. Try again later.")
            }
            Error::UpstreamUnavailable(e) => e.clone(),
            Error::InternalError(_) => {
                String::from("An unexpected error occurred. Please try again later.")
            }
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        if let Error::UpstreamRateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::UpstreamUnavailable(format!("Failed to reach the Spotify API: {e}"))
    }
}

impl From<hyper::http::Error> for Error {
    fn from(e: hyper::http::Error) -> Error {
        Error::InternalError(InternalError::RequestError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::InternalError(InternalError::JSONError(e))
    }
}

/// Everything a response needs to render the standard error body except the
/// request path, which only the surrounding middleware knows. Stored in
/// response extensions until that middleware picks it up.
#[derive(Clone, Debug)]
pub struct ErrorDetails {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl From<Error> for Response {
    fn from(e: Error) -> Response {
        if let Error::InternalError(e) = &e {
            tracing::error!("server error: {:?}", e);
        }
        let details = ErrorDetails {
            status: e.status(),
            error: e.title(),
            message: e.public_message(),
            retry_after: e.retry_after(),
        };
        let mut response = details.status.into_response();
        response.extensions_mut().insert(details);
        response
    }
}
