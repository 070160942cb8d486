use axum::{
    extract::{Host, OriginalUri, Query, Request, State},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use axum_login::{
    tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer},
    AuthManagerLayerBuilder,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use time::Duration;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::Instrument;
use uuid::Uuid;
use wrapped::{
    spotify::{Album, Artist, Track},
    EndpointIndex, Error, ErrorBody, ErrorDetails, HealthResponse, HomeResponse, TimeRange,
    TopItemsEnvelope, WrappedResponse, DEFAULT_LIMIT, MAX_LIMIT,
};
use wrapped_web::{
    spotify::{self, SpotifyClient},
    stats,
    user::{self, Credentials, User, UserStore},
};

type AuthSession = axum_login::AuthSession<UserStore>;

const OAUTH_STATE_KEY: &str = "oauth.state";
const CORRELATION_ID_HEADER: &str = "x-correlation-id";

struct AppState {
    spotify: SpotifyClient,
    store: UserStore,
}

fn require_user(auth: &AuthSession) -> Result<User, Response> {
    if let Some(user) = &auth.user {
        Ok(user.clone())
    } else {
        Err(Error::Unauthenticated.into())
    }
}

#[derive(Debug, Deserialize)]
struct TopItemsParams {
    limit: Option<String>,
    #[serde(rename = "timeRange", alias = "time_range")]
    time_range: Option<String>,
}

fn validate_params(params: &TopItemsParams) -> Result<(usize, TimeRange), Error> {
    let limit = match &params.limit {
        Some(value) => value
            .parse()
            .map_err(|_| Error::invalid_request(format!("Invalid limit: {value}")))?,
        None => DEFAULT_LIMIT,
    };
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(Error::invalid_request("Limit must be between 1 and 50"));
    }
    let time_range = match &params.time_range {
        Some(value) => value.parse::<TimeRange>()?,
        None => TimeRange::default(),
    };
    Ok((limit, time_range))
}

async fn home_handler(auth: AuthSession) -> Json<HomeResponse> {
    if let Some(user) = &auth.user {
        Json(HomeResponse {
            authenticated: true,
            user: Some(user.display_name().to_owned()),
            message: String::from("You are logged in! Try: /api/spotify/wrapped"),
            login_url: None,
            endpoints: Some(EndpointIndex::default()),
        })
    } else {
        Json(HomeResponse {
            authenticated: false,
            user: None,
            message: String::from("Welcome to Spotify Wrapped API! Please log in with Spotify."),
            login_url: Some(String::from("/oauth2/authorization/spotify")),
            endpoints: None,
        })
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("UP"),
        timestamp: wrapped::timestamp(),
    })
}

async fn wrapped_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopItemsParams>,
    auth: AuthSession,
) -> Result<Json<WrappedResponse>, Response> {
    let mut user = require_user(&auth)?;
    let (limit, time_range) = validate_params(&params)?;
    tracing::info!(
        "GET /api/spotify/wrapped - limit: {}, timeRange: {}",
        limit,
        time_range.as_str()
    );
    let access_token = spotify::get_access_token(&state.store, &mut user).await?;
    Ok(Json(
        stats::wrapped(&state.spotify, &access_token, limit, time_range).await?,
    ))
}

async fn top_tracks_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopItemsParams>,
    auth: AuthSession,
) -> Result<Json<TopItemsEnvelope<Track>>, Response> {
    let mut user = require_user(&auth)?;
    let (limit, time_range) = validate_params(&params)?;
    tracing::info!(
        "GET /api/spotify/top/tracks - limit: {}, timeRange: {}",
        limit,
        time_range.as_str()
    );
    let access_token = spotify::get_access_token(&state.store, &mut user).await?;
    Ok(Json(
        stats::top_tracks(&state.spotify, &access_token, limit, time_range).await?,
    ))
}

async fn top_artists_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopItemsParams>,
    auth: AuthSession,
) -> Result<Json<TopItemsEnvelope<Artist>>, Response> {
    let mut user = require_user(&auth)?;
    let (limit, time_range) = validate_params(&params)?;
    tracing::info!(
        "GET /api/spotify/top/artists - limit: {}, timeRange: {}",
        limit,
        time_range.as_str()
    );
    let access_token = spotify::get_access_token(&state.store, &mut user).await?;
    Ok(Json(
        stats::top_artists(&state.spotify, &access_token, limit, time_range).await?,
    ))
}

async fn top_albums_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopItemsParams>,
    auth: AuthSession,
) -> Result<Json<TopItemsEnvelope<Album>>, Response> {
    let mut user = require_user(&auth)?;
    let (limit, time_range) = validate_params(&params)?;
    tracing::info!(
        "GET /api/spotify/top/albums - limit: {}, timeRange: {}",
        limit,
        time_range.as_str()
    );
    let access_token = spotify::get_access_token(&state.store, &mut user).await?;
    Ok(Json(
        stats::top_albums(&state.spotify, &access_token, limit, time_range).await?,
    ))
}

async fn top_genres_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopItemsParams>,
    auth: AuthSession,
) -> Result<Json<TopItemsEnvelope<String>>, Response> {
    let mut user = require_user(&auth)?;
    let (limit, time_range) = validate_params(&params)?;
    tracing::info!(
        "GET /api/spotify/top/genres - limit: {}, timeRange: {}",
        limit,
        time_range.as_str()
    );
    let access_token = spotify::get_access_token(&state.store, &mut user).await?;
    Ok(Json(
        stats::top_genres(&state.spotify, &access_token, limit, time_range).await?,
    ))
}

fn origin(host: &str, path: &str) -> String {
    let origin;
    #[cfg(feature = "dev")]
    {
        origin = format!("http://{}{}", host, path);
    }
    #[cfg(not(feature = "dev"))]
    {
        origin = format!("https://{}{}", host, path);
    }
    origin
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}

async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    session: Session,
) -> Result<Redirect, Response> {
    let state_token = generate_state();
    session
        .insert(OAUTH_STATE_KEY, state_token.clone())
        .await
        .map_err(|e| Error::internal_error(format!("session error: {e}")))?;
    let redirect_uri = origin(&host, "/login/oauth2/code/spotify");
    Ok(Redirect::to(
        &state.spotify.authorize_url(&redirect_uri, &state_token),
    ))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn login_handler(
    OriginalUri(original_uri): OriginalUri,
    Query(params): Query<CallbackParams>,
    Host(host): Host,
    session: Session,
    mut auth: AuthSession,
) -> Result<impl IntoResponse, Response> {
    if let Some(error) = params.error {
        return Err(Error::upstream_auth(format!("Spotify authorization failed: {error}")).into());
    }
    let expected: Option<String> = session
        .remove(OAUTH_STATE_KEY)
        .await
        .map_err(|e| Error::internal_error(format!("session error: {e}")))?;
    if expected.is_none() || expected != params.state {
        return Err(Error::upstream_auth("OAuth state mismatch").into());
    }
    let Some(code) = params.code else {
        return Err(Error::upstream_auth("Spotify did not return an authorization code").into());
    };
    let origin = origin(&host, original_uri.path());
    let user = auth
        .authenticate(Credentials { code, origin })
        .await
        .map_err(user::auth_error)?
        .ok_or_else(|| Response::from(Error::upstream_auth("Login failed")))?;
    auth.login(&user).await.map_err(user::auth_error)?;
    tracing::info!("user {} logged in", user.id);
    Ok(Redirect::to("/"))
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    mut auth: AuthSession,
) -> Result<Redirect, Response> {
    if let Some(user) = &auth.user {
        // Log out of all of the user's sessions by rotating the user secret
        state.store.rotate_secret(&user.id);
    }
    auth.logout().await.map_err(user::auth_error)?;
    Ok(Redirect::to("/"))
}

/// Renders the standard error body for any response carrying `ErrorDetails`.
/// Runs outside the handlers because only the middleware sees the request
/// path the body reports.
async fn error_body(OriginalUri(original_uri): OriginalUri, req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    if let Some(details) = resp.extensions_mut().remove::<ErrorDetails>() {
        let body = ErrorBody {
            status: details.status.as_u16(),
            error: details.error.to_owned(),
            message: details.message,
            path: original_uri.path().to_owned(),
            timestamp: wrapped::timestamp(),
        };
        let mut resp = (details.status, Json(body)).into_response();
        if let Some(secs) = details.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        return resp;
    }
    resp
}

/// Tags every request with a correlation ID, reusing the caller's if present.
async fn correlation_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_hyphenated().to_string());
    let span = tracing::info_span!("request", correlation_id = %id);
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    resp
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let spotify = SpotifyClient::from_env().expect("Spotify client configuration");
    let store = UserStore::new(spotify.clone());
    let shared_state = Arc::new(AppState {
        spotify,
        store: store.clone(),
    });

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));
    let auth_layer = AuthManagerLayerBuilder::new(store, session_layer).build();

    let api_router = Router::new()
        .route("/", get(home_handler))
        .route("/health", get(health_handler))
        .route("/spotify/wrapped", get(wrapped_handler))
        .route("/spotify/top/tracks", get(top_tracks_handler))
        .route("/spotify/top/artists", get(top_artists_handler))
        .route("/spotify/top/albums", get(top_albums_handler))
        .route("/spotify/top/genres", get(top_genres_handler));

    let app = Router::new()
        .nest("/api", api_router)
        .route("/oauth2/authorization/spotify", get(authorize_handler))
        .route("/login/oauth2/code/spotify", get(login_handler))
        .route("/logout", get(logout_handler))
        .with_state(shared_state)
        .layer(middleware::from_fn(error_body))
        .layer(auth_layer)
        .layer(middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .fallback_service(ServeDir::new("www").not_found_service(ServeFile::new("www/index.html")));

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
