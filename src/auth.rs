//! # Authentication Module
//!
//! Username/password accounts with Argon2id hashes and short-lived JWT
//! access tokens.
//!
//! ## Features
//! - Signup and login returning a bearer token
//! - [`AuthUser`] extractor that rejects a request before the handler body
//!   runs when the token is missing, invalid, expired, or names a deleted user
//! - Listing of every account except the configured reserved username

use crate::api::{required, AppState};
use crate::db::{SqlValue, Store};
use crate::error::{TrackerError, TrackerResult};
use crate::models::UserSummary;
use crate::groups::DAILY_ROW_KEY;
use crate::questions::QUESTION_ROW_KEYS;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRef, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Default access token expiry (1 hour)
const DEFAULT_ACCESS_TOKEN_DURATION: Duration = Duration::from_secs(3600);

const MIN_PASSWORD_LENGTH: usize = 8;

lazy_static! {
    /// Letters, digits and `@ . + - _`, at most 150 characters
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9@.+_-]{1,150}$").unwrap();
}

fn username_taken(username: &str) -> TrackerError {
    TrackerError::Conflict(format!("Username '{}' is already taken", username))
}

/// Authentication service managing accounts and tokens
#[derive(Clone)]
pub struct AuthService {
    store: Arc<Store>,
    jwt_secret: Vec<u8>,
    access_token_duration: Duration,
}

/// Token returned after successful authentication
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: i64,
    pub username: String,
    pub exp: u64,
    pub iat: u64,
}

/// Authenticated caller extracted from the `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthService {
    pub fn new(store: Arc<Store>, jwt_secret: Vec<u8>) -> Self {
        info!("Auth service initialized");
        Self {
            store,
            jwt_secret,
            access_token_duration: DEFAULT_ACCESS_TOKEN_DURATION,
        }
    }

    /// Generate a secure random JWT secret
    pub fn generate_secret() -> Vec<u8> {
        let mut secret = vec![0u8; 64];
        rand::thread_rng().fill(&mut secret[..]);
        secret
    }

    fn hash_password(&self, password: &str) -> TrackerResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| TrackerError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))
    }

    fn verify_password(&self, password: &str, hash: &str) -> TrackerResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| TrackerError::Internal(anyhow::anyhow!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn generate_access_token(&self, user: &UserSummary) -> TrackerResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TrackerError::Internal(anyhow::anyhow!("Time error: {}", e)))?;

        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            iat: now.as_secs(),
            exp: (now + self.access_token_duration).as_secs(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.jwt_secret),
        )
        .map_err(|e| TrackerError::Internal(anyhow::anyhow!("JWT encoding failed: {}", e)))
    }

    /// Validate a JWT access token and return its claims
    pub fn validate_token(&self, token: &str) -> TrackerResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.jwt_secret),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| TrackerError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// Validates the token and confirms its user still exists
    pub async fn authenticate(&self, token: &str) -> TrackerResult<AuthUser> {
        let claims = self.validate_token(token)?;
        let user = self
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| TrackerError::unauthorized("User no longer exists"))?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
        })
    }

    fn validate_username(username: &str) -> TrackerResult<()> {
        if !USERNAME_REGEX.is_match(username) {
            return Err(TrackerError::invalid(
                "Username must be 1-150 characters of letters, digits and @.+-_",
            ));
        }
        // Usernames become keys next to fixed fields in listing and stats rows
        if QUESTION_ROW_KEYS.contains(&username) || username == DAILY_ROW_KEY {
            return Err(TrackerError::invalid(format!(
                "Username '{}' is reserved",
                username
            )));
        }
        Ok(())
    }

    fn validate_password(password: &str) -> TrackerResult<()> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(TrackerError::invalid(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    /// Register a new account and sign it in
    pub async fn signup(&self, creds: Credentials) -> TrackerResult<AuthTokens> {
        let username = required(creds.username, "username")?;
        let password = required(creds.password, "password")?;
        Self::validate_username(&username)?;
        Self::validate_password(&password)?;

        let existing = self
            .store
            .query_opt(
                "SELECT id FROM users WHERE username = ?".to_string(),
                vec![SqlValue::Text(username.clone())],
                |row| row.get::<_, i64>(0),
            )
            .await?;
        if existing.is_some() {
            return Err(username_taken(&username));
        }

        let password_hash = self.hash_password(&password)?;
        // A concurrent signup can still claim the name while we hash
        let id = self
            .store
            .insert(
                "INSERT INTO users (username, password_hash) VALUES (?, ?)".to_string(),
                vec![SqlValue::Text(username.clone()), SqlValue::Text(password_hash)],
            )
            .await
            .map_err(|e| match e {
                TrackerError::Conflict(_) => username_taken(&username),
                e => e,
            })?;
        info!("New user registered: {}", username);

        self.issue_tokens(UserSummary { id, username })
    }

    /// Check credentials and return a fresh token
    pub async fn login(&self, creds: Credentials) -> TrackerResult<AuthTokens> {
        let username = required(creds.username, "username")?;
        let password = required(creds.password, "password")?;

        let row = self
            .store
            .query_opt(
                "SELECT id, username, password_hash FROM users WHERE username = ?".to_string(),
                vec![SqlValue::Text(username)],
                |row| Ok((UserSummary::from_row(row)?, row.get::<_, String>("password_hash")?)),
            )
            .await?;

        let (user, password_hash) =
            row.ok_or_else(|| TrackerError::unauthorized("Invalid credentials"))?;

        if !self.verify_password(&password, &password_hash)? {
            return Err(TrackerError::unauthorized("Invalid credentials"));
        }

        debug!("User logged in: {}", user.username);
        self.issue_tokens(user)
    }

    fn issue_tokens(&self, user: UserSummary) -> TrackerResult<AuthTokens> {
        Ok(AuthTokens {
            access_token: self.generate_access_token(&user)?,
            expires_in: self.access_token_duration.as_secs() as i64,
            token_type: "Bearer".to_string(),
            user,
        })
    }

    pub async fn find_user(&self, id: i64) -> TrackerResult<Option<UserSummary>> {
        self.store
            .query_opt(
                format!("SELECT {} FROM users WHERE id = ?", UserSummary::COLUMNS),
                vec![SqlValue::Integer(id)],
                UserSummary::from_row,
            )
            .await
    }

    /// Every account except `reserved`, in signup order
    pub async fn list_users(&self, reserved: &str) -> TrackerResult<Vec<UserSummary>> {
        self.store
            .query_rows(
                format!(
                    "SELECT {} FROM users WHERE username != ? ORDER BY id",
                    UserSummary::COLUMNS
                ),
                vec![SqlValue::Text(reserved.to_string())],
                UserSummary::from_row,
            )
            .await
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AuthService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = TrackerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| TrackerError::unauthorized("Missing or malformed bearer token"))?;

        AuthService::from_ref(state).authenticate(bearer.token()).await
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// POST /v1/auth/signup
async fn signup_handler(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(creds) = payload?;
    let tokens = state.auth.signup(creds).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": tokens })),
    ))
}

/// POST /v1/auth/login
async fn login_handler(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(creds) = payload?;
    let tokens = state.auth.login(creds).await?;
    Ok(Json(json!({ "data": tokens })))
}

/// GET /v1/auth/me
async fn me_handler(user: AuthUser) -> impl IntoResponse {
    Json(json!({
        "data": UserSummary {
            id: user.id,
            username: user.username,
        }
    }))
}

/// GET /v1/users
async fn list_users_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TrackerError> {
    let users = state.auth.list_users(&state.reserved_username).await?;
    Ok(Json(json!({ "data": users })))
}

pub fn create_auth_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/auth/signup", post(signup_handler))
        .route("/v1/auth/login", post(login_handler))
        .route("/v1/auth/me", get(me_handler))
        .route("/v1/users", get(list_users_handler))
        .with_state(state)
}
