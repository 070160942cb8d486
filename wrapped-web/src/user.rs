use crate::spotify::{AuthClient, SpotifyClient};
use async_trait::async_trait;
use axum_login::{AuthUser, AuthnBackend, UserId};
use base64::prelude::{Engine, BASE64_STANDARD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use time::OffsetDateTime;
use wrapped::Error;

/// Refresh this many seconds before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SpotifyCredentials {
    pub user_id: String,
    pub display_name: Option<String>,
    pub url: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp after which `access_token` is no longer valid.
    pub expires_at: i64,
}

impl SpotifyCredentials {
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() + EXPIRY_MARGIN_SECS >= self.expires_at
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    pub secret: String,
    pub credentials: SpotifyCredentials,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.credentials.display_name.as_deref().unwrap_or(&self.id)
    }
}

impl AuthUser for User {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn session_auth_hash(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

/// OAuth2 callback parameters handed to the backend for authentication.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub code: String,
    pub origin: String,
}

/// In-process user store doubling as the axum-login authentication backend.
/// Keyed by Spotify user id; the RwLock gives one writer per key at a time.
#[derive(Clone)]
pub struct UserStore<C = SpotifyClient> {
    users: Arc<RwLock<HashMap<String, User>>>,
    client: C,
}

impl<C> UserStore<C> {
    pub fn new(client: C) -> UserStore<C> {
        UserStore {
            users: Arc::new(RwLock::new(HashMap::new())),
            client,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().unwrap().get(id).cloned()
    }

    pub fn upsert_user(&self, user: User) {
        self.users.write().unwrap().insert(user.id.clone(), user);
    }

    /// Log the user out of all sessions by rotating the user secret.
    pub fn rotate_secret(&self, id: &str) {
        if let Some(user) = self.users.write().unwrap().get_mut(id) {
            user.secret = generate_secret();
        }
    }
}

pub async fn spotify_login<C>(store: &UserStore<C>, code: &str, origin: &str) -> Result<User, Error>
where
    C: AuthClient<Credentials = SpotifyCredentials> + Sync,
{
    let credentials = store.client().get_credentials(code, origin).await?;
    let user = if let Some(mut user) = store.get_user(&credentials.user_id) {
        // Refresh tokens, keep the secret so existing sessions survive
        user.credentials = credentials;
        user
    } else {
        User {
            id: credentials.user_id.clone(),
            secret: generate_secret(),
            credentials,
        }
    };
    store.upsert_user(user.clone());
    Ok(user)
}

#[async_trait]
impl<C> AuthnBackend for UserStore<C>
where
    C: AuthClient<Credentials = SpotifyCredentials> + Clone + Send + Sync + 'static,
{
    type User = User;
    type Credentials = Credentials;
    type Error = Error;

    async fn authenticate(&self, credentials: Credentials) -> Result<Option<User>, Error> {
        spotify_login(self, &credentials.code, &credentials.origin)
            .await
            .map(Some)
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<User>, Error> {
        Ok(UserStore::get_user(self, user_id))
    }
}

pub fn auth_error<C>(e: axum_login::Error<UserStore<C>>) -> Error
where
    C: AuthClient<Credentials = SpotifyCredentials> + Clone + Send + Sync + 'static,
{
    match e {
        axum_login::Error::Backend(e) => e,
        axum_login::Error::Session(e) => Error::internal_error(format!("session error: {e}")),
    }
}

pub fn generate_secret() -> String {
    BASE64_STANDARD.encode(rand::thread_rng().gen::<[u8; 64]>())
}
