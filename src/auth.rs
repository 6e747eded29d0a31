use std::ops::Add;
use std::sync::Arc;

use axum::extract::{FromRequest, RequestParts};
use axum::headers::Cookie;
use axum::http::header::{HeaderName, SET_COOKIE};
use axum::response::Redirect;
use axum::{async_trait, Extension, Json, TypedHeader};
use chrono::{Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::err::{field_error, Error, Success};
use crate::models::{LoginForm, RegisterUser, Role, UserData, UserSession};
use crate::users;
use crate::view::{bare, Empty, Payload, View};

pub const SESSION_COOKIE: &str = "ssid";

pub const EMAIL_TAKEN: &str = "There is already a user registered with the email provided";

/// A response carrying a fresh `Set-Cookie` header next to its view.
pub type WithCookie<T> = ([(HeaderName, String); 1], Json<Success<T>>);

pub fn with_cookie<T: Serialize>(cookie: String, value: T) -> Result<WithCookie<T>, Error> {
    Ok(([(SET_COOKIE, cookie)], Json(Success::of(value))))
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(password_hash)?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
}

fn new_ssid() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(&ssid_bytes);
    hex::encode(hasher.finalize())
}

pub fn session_cookie(ssid: &str, ttl: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        ssid,
        ttl.num_seconds()
    )
}

pub fn clear_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; Max-Age=0", SESSION_COOKIE)
}

pub async fn open_session(pg: &PgPool, user_id: Uuid, ttl: Duration) -> Result<UserSession, Error> {
    let session = UserSession {
        ssid: new_ssid(),
        belongs_to: user_id,
        expires_at: Utc::now().add(ttl),
    };
    let res = sqlx::query("INSERT INTO user_sessions (ssid, belongs_to, expires_at) VALUES ($1, $2, $3)")
        .bind(&session.ssid)
        .bind(session.belongs_to)
        .bind(session.expires_at)
        .execute(pg)
        .await?;

    if res.rows_affected() < 1 {
        return Err(Error::InternalError {
            kind: "DatabaseError",
            message: "Could not store session id!".to_string(),
        });
    }
    Ok(session)
}

pub async fn drop_session(pg: &PgPool, ssid: &str) -> Result<bool, Error> {
    let affected = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1")
        .bind(ssid)
        .execute(pg)
        .await?;
    Ok(affected.rows_affected() >= 1)
}

#[derive(Debug, Clone)]
pub enum AuthResult {
    Success(UserSession),
    SessionExpired,
    InvalidSession,
}

pub async fn ensure_authenticated(ssid: &str, pg: &PgPool) -> Result<AuthResult, Error> {
    if ssid.is_empty() {
        return Ok(AuthResult::InvalidSession);
    }
    let session = sqlx::query_as::<_, UserSession>(
        "SELECT ssid, belongs_to, expires_at FROM user_sessions WHERE ssid = $1 LIMIT 1",
    )
    .bind(ssid)
    .fetch_optional(pg)
    .await?;

    match session {
        Some(session) if Utc::now() > session.expires_at => {
            drop_session(pg, ssid).await?;
            Ok(AuthResult::SessionExpired)
        }
        Some(session) => Ok(AuthResult::Success(session)),
        None => Ok(AuthResult::InvalidSession),
    }
}

/// The authenticated caller of a request, resolved from the session cookie.
/// Handlers that accept anonymous visitors take `Option<Principal>`.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: UserData,
    pub ssid: String,
}

impl Principal {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.user.roles.has(role)
    }

    pub fn require(&self, role: Role) -> Result<(), Error> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(Error::forbidden(format!("{} role required", role)))
        }
    }
}

fn unauthenticated(message: &str) -> Error {
    Error::Unauthenticated {
        message: message.to_string(),
    }
}

#[async_trait]
impl<B> FromRequest<B> for Principal
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let ssid = TypedHeader::<Cookie>::from_request(req)
            .await
            .ok()
            .and_then(|TypedHeader(cookie)| cookie.get(SESSION_COOKIE).map(str::to_owned));
        let ssid = match ssid {
            Some(ssid) if !ssid.is_empty() => ssid,
            _ => return Err(unauthenticated("Please log in")),
        };

        let Extension(pg) = Extension::<PgPool>::from_request(req)
            .await
            .map_err(|_| Error::InternalError {
                kind: "ExtensionError",
                message: "Database pool is not configured".to_string(),
            })?;

        let session = match ensure_authenticated(&ssid, &pg).await? {
            AuthResult::Success(session) => session,
            AuthResult::SessionExpired => return Err(unauthenticated("Session expired, please log in again")),
            AuthResult::InvalidSession => return Err(unauthenticated("Please log in")),
        };

        match users::find_by_id(&pg, session.belongs_to).await? {
            Some(user) => Ok(Principal { user, ssid }),
            None => {
                drop_session(&pg, &ssid).await?;
                Err(unauthenticated("Please log in"))
            }
        }
    }
}

/// Swaps the caller's session for a new one bound to the same account, so an
/// edited email or password is picked up without logging in again. Returns
/// the `Set-Cookie` value carrying the new session id.
pub async fn reissue_session(pg: &PgPool, principal: &Principal, ttl: Duration) -> Result<String, Error> {
    drop_session(pg, &principal.ssid).await?;
    let session = open_session(pg, principal.id(), ttl).await?;
    log::debug!("Re-issued session for user with ID: {}", principal.id());
    Ok(session_cookie(&session.ssid, ttl))
}

pub async fn login_page() -> Payload<View<Empty>> {
    bare("login")
}

pub async fn login(
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Arc<Config>>,
    Json(login): Json<LoginForm>,
) -> Result<([(HeaderName, String); 1], Redirect), Error> {
    if login.password.is_empty() {
        return Err(unauthenticated("Invalid email or password"));
    }

    let user = match users::find_by_email(&pg, &login.email).await? {
        Some(user) => user,
        None => return Err(unauthenticated("Invalid email or password")),
    };
    if !verify_password(&login.password, &user.password_hash)? {
        log::warn!("Failed login attempt for user with ID: {}", user.id);
        return Err(unauthenticated("Invalid email or password"));
    }
    if !user.active {
        log::warn!("Blocked user with ID {} tried to log in", user.id);
        return Err(unauthenticated("Your account has been blocked"));
    }

    let session = open_session(&pg, user.id, config.session_ttl()).await?;
    log::info!("User with ID {} logged in", user.id);
    Ok((
        [(SET_COOKIE, session_cookie(&session.ssid, config.session_ttl()))],
        Redirect::to("/"),
    ))
}

pub async fn logout(
    principal: Option<Principal>,
    Extension(pg): Extension<PgPool>,
) -> Result<([(HeaderName, String); 1], Redirect), Error> {
    if let Some(principal) = principal {
        drop_session(&pg, &principal.ssid).await?;
        log::info!("User with ID {} logged out", principal.id());
    }
    Ok(([(SET_COOKIE, clear_cookie())], Redirect::to("/")))
}

pub async fn registration_page() -> Payload<View<Empty>> {
    bare("registration")
}

pub async fn register_user(
    Extension(pg): Extension<PgPool>,
    Json(form): Json<RegisterUser>,
) -> Payload<View<Empty>> {
    let mut errors = match form.validate() {
        Ok(()) => validator::ValidationErrors::new(),
        Err(errors) => errors,
    };
    if users::email_taken(&pg, &form.email, None).await? {
        errors.add("email", field_error("taken", EMAIL_TAKEN));
    }
    if !errors.errors().is_empty() {
        log::error!("Cannot register user, wrong input");
        return Err(Error::invalid("registration", &errors));
    }

    let user = users::save_user(&pg, &form).await?;
    log::info!("Registered user with ID: {}", user.id);
    View::new("registration", Empty {})
        .success("User has been registered successfully")
        .render()
}
