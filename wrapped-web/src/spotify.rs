use crate::user::{SpotifyCredentials, User, UserStore};
use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use hyper::{Body, Client, Method, Request, Uri};
use hyper_tls::HttpsConnector;
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use wrapped::{
    spotify::{Artist, Track},
    Error, TimeRange,
};

pub const AUTHORIZATION_SCOPES: &str = "user-top-read";

/// Fetches a user's top items from the Spotify API with their bearer token.
#[async_trait]
pub trait SpotifyApi {
    async fn top_tracks(
        &self,
        access_token: &str,
        limit: usize,
        time_range: TimeRange,
    ) -> Result<Vec<Track>, Error>;

    async fn top_artists(
        &self,
        access_token: &str,
        limit: usize,
        time_range: TimeRange,
    ) -> Result<Vec<Artist>, Error>;
}

/// Exchanges and refreshes OAuth2 tokens for a user.
#[async_trait]
pub trait AuthClient {
    type Credentials;

    async fn get_credentials(&self, code: &str, origin: &str) -> Result<Self::Credentials, Error>;

    async fn refresh_credentials(
        &self,
        credentials: &Self::Credentials,
    ) -> Result<Self::Credentials, Error>;
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub api_url: String,
    pub auth_url: String,
    pub client_id: String,
    client_secret: String,
}

impl SpotifyClient {
    pub fn from_env() -> Result<SpotifyClient, Error> {
        Ok(SpotifyClient {
            api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| String::from("https://api.spotify.com/v1")),
            auth_url: std::env::var("SPOTIFY_AUTH_URL")
                .unwrap_or_else(|_| String::from("https://accounts.spotify.com")),
            client_id: std::env::var("SPOTIFY_CLIENT_ID")
                .map_err(|_| Error::internal_error("SPOTIFY_CLIENT_ID is missing"))?,
            client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")
                .map_err(|_| Error::internal_error("SPOTIFY_CLIENT_SECRET is missing"))?,
        })
    }

    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(AUTHORIZATION_SCOPES),
            state
        )
    }

    fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        url: String,
    ) -> Result<T, Error> {
        let https = HttpsConnector::new();
        let client = Client::builder().build::<_, hyper::Body>(https);
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::internal_error(format!("Invalid Spotify API URL: {e}")))?;
        let resp = client
            .request(
                Request::builder()
                    .uri(uri)
                    .header("Authorization", format!("Bearer {}", access_token))
                    .body(Body::empty())?,
            )
            .await?;
        read_response(resp).await
    }

    async fn token_request(&self, body: String) -> Result<TokenResponse, Error> {
        let https = HttpsConnector::new();
        let client = Client::builder().build::<_, hyper::Body>(https);
        let uri: Uri = format!("{}/api/token", self.auth_url)
            .parse()
            .map_err(|e| Error::internal_error(format!("Invalid Spotify auth URL: {e}")))?;
        let resp = client
            .request(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header("Authorization", self.basic_auth())
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(Body::from(body))?,
            )
            .await?;
        let status = resp.status();
        let got = hyper::body::to_bytes(resp.into_body()).await?;
        if !status.is_success() {
            return Err(Error::upstream_auth(format!(
                "Spotify rejected the token request: {}",
                status
            )));
        }
        serde_json::from_slice(&got).map_err(Error::from)
    }
}

/// Maps upstream HTTP status codes to typed error kinds before decoding.
async fn read_response<T: DeserializeOwned>(resp: hyper::Response<Body>) -> Result<T, Error> {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    let got = hyper::body::to_bytes(resp.into_body()).await?;
    match status.as_u16() {
        200..=299 => serde_json::from_slice(&got).map_err(Error::from),
        401 => Err(Error::upstream_auth(
            "Spotify rejected the access token. Please log in again.",
        )),
        429 => Err(Error::UpstreamRateLimited { retry_after }),
        s => Err(Error::UpstreamUnavailable(format!(
            "Spotify API returned status {s}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    display_name: Option<String>,
    external_urls: HashMap<String, String>,
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    async fn top_tracks(
        &self,
        access_token: &str,
        limit: usize,
        time_range: TimeRange,
    ) -> Result<Vec<Track>, Error> {
        let page: Page<Track> = self
            .get_json(
                access_token,
                format!(
                    "{}/me/top/tracks?limit={}&time_range={}",
                    self.api_url,
                    limit,
                    time_range.as_str()
                ),
            )
            .await?;
        Ok(page.items)
    }

    async fn top_artists(
        &self,
        access_token: &str,
        limit: usize,
        time_range: TimeRange,
    ) -> Result<Vec<Artist>, Error> {
        let page: Page<Artist> = self
            .get_json(
                access_token,
                format!(
                    "{}/me/top/artists?limit={}&time_range={}",
                    self.api_url,
                    limit,
                    time_range.as_str()
                ),
            )
            .await?;
        Ok(page.items)
    }
}

#[async_trait]
impl AuthClient for SpotifyClient {
    type Credentials = SpotifyCredentials;

    async fn get_credentials(&self, code: &str, origin: &str) -> Result<SpotifyCredentials, Error> {
        let token = self
            .token_request(format!(
                "grant_type=authorization_code&code={}&redirect_uri={}",
                urlencoding::encode(code),
                urlencoding::encode(origin)
            ))
            .await?;
        let refresh_token = token
            .refresh_token
            .ok_or_else(|| Error::upstream_auth("Spotify did not return a refresh token"))?;
        let user: CurrentUser = self
            .get_json(&token.access_token, format!("{}/me", self.api_url))
            .await?;
        Ok(SpotifyCredentials {
            user_id: user.id,
            display_name: user.display_name,
            url: user
                .external_urls
                .get("spotify")
                .cloned()
                .unwrap_or_default(),
            access_token: token.access_token,
            refresh_token,
            expires_at: OffsetDateTime::now_utc().unix_timestamp() + token.expires_in,
        })
    }

    async fn refresh_credentials(
        &self,
        credentials: &SpotifyCredentials,
    ) -> Result<SpotifyCredentials, Error> {
        let token = self
            .token_request(format!(
                "grant_type=refresh_token&refresh_token={}",
                urlencoding::encode(&credentials.refresh_token)
            ))
            .await?;
        let mut refreshed = credentials.clone();
        refreshed.access_token = token.access_token;
        // Spotify only returns a new refresh token when it rotates the old one
        if let Some(refresh_token) = token.refresh_token {
            refreshed.refresh_token = refresh_token;
        }
        refreshed.expires_at = OffsetDateTime::now_utc().unix_timestamp() + token.expires_in;
        Ok(refreshed)
    }
}

/// Returns a live access token for the user, refreshing and persisting the
/// credentials first if the stored token is at or past its expiry margin.
pub async fn get_access_token<C>(store: &UserStore<C>, user: &mut User) -> Result<String, Error>
where
    C: AuthClient<Credentials = SpotifyCredentials> + Clone + Send + Sync,
{
    if !user.credentials.is_expired() {
        return Ok(user.credentials.access_token.clone());
    }
    user.credentials = store.client().refresh_credentials(&user.credentials).await?;
    store.upsert_user(user.clone());
    Ok(user.credentials.access_token.clone())
}
