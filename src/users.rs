//! The user directory and the handlers through which a user manages their
//! own account.

use std::sync::Arc;

use axum::http::header::{HeaderName, SET_COOKIE};
use axum::response::Redirect;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::auth::{self, clear_cookie, hash_password, verify_password, Principal, WithCookie, EMAIL_TAKEN};
use crate::config::Config;
use crate::err::{field_error, Error};
use crate::models::{PasswordForm, ProfileForm, RegisterUser, Role, UserData};
use crate::view::{Payload, View};

pub const UPDATE_USER_VIEW: &str = "update-user";
pub const UPDATE_PASSWORD_VIEW: &str = "update-password";
pub const UPDATE_PASSWORD_ERROR: &str = "Cannot update password, wrong input";
pub const MIN_PASSWORD_LENGTH: usize = 6;

const USER_SELECT: &str = "SELECT u.id, u.name, u.surname, u.email, u.password_hash, u.active, u.created_at, \
     ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role) AS roles \
     FROM users u";

pub async fn find_by_email(pg: &PgPool, email: &str) -> Result<Option<UserData>, Error> {
    Ok(sqlx::query_as::<_, UserData>(&format!("{} WHERE u.email = $1 LIMIT 1", USER_SELECT))
        .bind(email)
        .fetch_optional(pg)
        .await?)
}

pub async fn find_by_id(pg: &PgPool, id: Uuid) -> Result<Option<UserData>, Error> {
    Ok(sqlx::query_as::<_, UserData>(&format!("{} WHERE u.id = $1", USER_SELECT))
        .bind(id)
        .fetch_optional(pg)
        .await?)
}

pub async fn find_or_404(pg: &PgPool, id: Uuid) -> Result<UserData, Error> {
    find_by_id(pg, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("User with ID {} does not exist", id)))
}

pub async fn all(pg: &PgPool) -> Result<Vec<UserData>, Error> {
    Ok(sqlx::query_as::<_, UserData>(&format!("{} ORDER BY u.surname, u.name", USER_SELECT))
        .fetch_all(pg)
        .await?)
}

pub async fn tutors(pg: &PgPool) -> Result<Vec<UserData>, Error> {
    Ok(sqlx::query_as::<_, UserData>(&format!(
        "{} WHERE EXISTS (SELECT 1 FROM user_roles r WHERE r.user_id = u.id AND r.role = $1) \
         ORDER BY u.surname, u.name",
        USER_SELECT
    ))
    .bind(Role::Tutor.as_str())
    .fetch_all(pg)
    .await?)
}

pub async fn tutors_of_subject(pg: &PgPool, subject_id: Uuid) -> Result<Vec<UserData>, Error> {
    Ok(sqlx::query_as::<_, UserData>(&format!(
        "{} WHERE EXISTS (SELECT 1 FROM user_roles r WHERE r.user_id = u.id AND r.role = $1) \
         AND EXISTS (SELECT 1 FROM user_subjects s WHERE s.user_id = u.id AND s.subject_id = $2) \
         ORDER BY u.surname, u.name",
        USER_SELECT
    ))
    .bind(Role::Tutor.as_str())
    .bind(subject_id)
    .fetch_all(pg)
    .await?)
}

/// True when an account other than `except` already uses `email`.
pub async fn email_taken(pg: &PgPool, email: &str, except: Option<Uuid>) -> Result<bool, Error> {
    Ok(match find_by_email(pg, email).await? {
        Some(existing) => Some(existing.id) != except,
        None => false,
    })
}

/// Stores a new, active account holding only the STUDENT role.
pub async fn save_user(pg: &PgPool, form: &RegisterUser) -> Result<UserData, Error> {
    let id = Uuid::new_v4();
    let password_hash = hash_password(&form.password)?;

    let mut tx = pg.begin().await?;
    sqlx::query(
        "INSERT INTO users (id, name, surname, email, password_hash, active, created_at) \
         VALUES ($1, $2, $3, $4, $5, TRUE, $6)",
    )
    .bind(id)
    .bind(&form.name)
    .bind(&form.surname)
    .bind(&form.email)
    .bind(&password_hash)
    .bind(Utc::now())
    .execute(&mut tx)
    .await?;
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
        .bind(id)
        .bind(Role::Student.as_str())
        .execute(&mut tx)
        .await?;
    tx.commit().await?;

    find_or_404(pg, id).await
}

pub async fn update_profile(pg: &PgPool, id: Uuid, form: &ProfileForm) -> Result<UserData, Error> {
    sqlx::query("UPDATE users SET name = $2, surname = $3, email = $4 WHERE id = $1")
        .bind(id)
        .bind(&form.name)
        .bind(&form.surname)
        .bind(&form.email)
        .execute(pg)
        .await?;
    find_or_404(pg, id).await
}

pub async fn update_password(pg: &PgPool, id: Uuid, password: &str) -> Result<(), Error> {
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(id)
        .bind(hash_password(password)?)
        .execute(pg)
        .await?;
    Ok(())
}

/// Adding a role the user already holds changes nothing.
pub async fn grant_role(pg: &PgPool, id: Uuid, role: Role) -> Result<(), Error> {
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(id)
        .bind(role.as_str())
        .execute(pg)
        .await?;
    Ok(())
}

pub async fn revoke_role(pg: &PgPool, id: Uuid, role: Role) -> Result<(), Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = $2")
        .bind(id)
        .bind(role.as_str())
        .execute(pg)
        .await?;
    Ok(())
}

/// Blocking only gates new logins; live sessions run until they expire.
pub async fn set_active(pg: &PgPool, id: Uuid, active: bool) -> Result<(), Error> {
    sqlx::query("UPDATE users SET active = $2 WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(pg)
        .await?;
    Ok(())
}

/// Removes the user from every consultation's student set, drops their
/// roles and taught subjects, then the row itself. Rows the user owns go
/// with it through the schema's cascades. Returns false if no such user.
pub async fn delete_user(pg: &PgPool, id: Uuid) -> Result<bool, Error> {
    let mut tx = pg.begin().await?;
    sqlx::query("DELETE FROM consultation_students WHERE student_id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM user_subjects WHERE user_id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    let res = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() >= 1)
}

/// Password rules shared by the self-service and administrator forms.
pub fn check_new_password(new_password: &str, current_hash: &str) -> Result<(), &'static str> {
    if verify_password(new_password, current_hash).unwrap_or(false) {
        return Err("Provided password matches your current password");
    }
    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err("Password must have at least 6 characters");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct HomeModel {
    user: Option<UserData>,
}

pub async fn home(principal: Option<Principal>) -> Payload<View<HomeModel>> {
    View::new(
        "index",
        HomeModel {
            user: principal.map(|p| p.user),
        },
    )
    .render()
}

#[derive(Debug, Serialize)]
pub struct ProfileModel {
    user: UserData,
}

pub async fn profile_page(principal: Principal) -> Payload<View<ProfileModel>> {
    View::new(UPDATE_USER_VIEW, ProfileModel { user: principal.user }).render()
}

pub async fn update_own_profile(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Arc<Config>>,
    Json(form): Json<ProfileForm>,
) -> Result<WithCookie<View<ProfileModel>>, Error> {
    let mut errors = match form.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };
    if email_taken(&pg, &form.email, Some(principal.id())).await? {
        errors.add("email", field_error("taken", EMAIL_TAKEN));
    }
    if !errors.errors().is_empty() {
        log::error!("Cannot update user, wrong input");
        return Err(Error::invalid(UPDATE_USER_VIEW, &errors));
    }

    let user = update_profile(&pg, principal.id(), &form).await?;
    log::info!("User with ID {} successfully updated", user.id);

    let cookie = auth::reissue_session(&pg, &principal, config.session_ttl()).await?;
    auth::with_cookie(
        cookie,
        View::new(UPDATE_USER_VIEW, ProfileModel { user }).success("Successfully updated profile data"),
    )
}

#[derive(Debug, Default, Serialize)]
pub struct PasswordModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    old_password_error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_password_error: Option<&'static str>,
}

pub async fn password_page(_principal: Principal) -> Payload<View<PasswordModel>> {
    View::new(UPDATE_PASSWORD_VIEW, PasswordModel::default()).render()
}

pub async fn update_own_password(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Arc<Config>>,
    Json(form): Json<PasswordForm>,
) -> Result<WithCookie<View<PasswordModel>>, Error> {
    if !verify_password(&form.old_password, &principal.user.password_hash)? {
        log::error!("{}", UPDATE_PASSWORD_ERROR);
        return Err(password_rejected(
            UPDATE_PASSWORD_VIEW,
            "old_password",
            "Provided password does not match your current password",
        ));
    }
    if let Err(message) = check_new_password(&form.new_password, &principal.user.password_hash) {
        log::error!("{}", UPDATE_PASSWORD_ERROR);
        return Err(password_rejected(UPDATE_PASSWORD_VIEW, "new_password", message));
    }

    update_password(&pg, principal.id(), &form.new_password).await?;
    log::info!("Password of user with ID {} successfully updated", principal.id());

    let cookie = auth::reissue_session(&pg, &principal, config.session_ttl()).await?;
    auth::with_cookie(
        cookie,
        View::new(UPDATE_PASSWORD_VIEW, PasswordModel::default()).success("Successfully updated password"),
    )
}

pub fn password_rejected(view: &'static str, field: &'static str, message: &'static str) -> Error {
    let mut errors = ValidationErrors::new();
    errors.add(field, field_error("password", message));
    Error::invalid(view, &errors)
}

pub async fn delete_profile(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Result<([(HeaderName, String); 1], Redirect), Error> {
    delete_user(&pg, principal.id()).await?;
    log::info!("Successfully deleted user with ID: {}", principal.id());
    Ok(([(SET_COOKIE, clear_cookie())], Redirect::to("/")))
}
