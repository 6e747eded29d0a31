//! Administrator-only management of users, subjects and comments. Every
//! handler here starts by demanding the ADMIN role.

use std::sync::Arc;

use axum::extract::Path;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::auth::{self, Principal, EMAIL_TAKEN};
use crate::comments;
use crate::config::Config;
use crate::err::{field_error, Error};
use crate::models::{NewPasswordForm, ProfileForm, RegisterUser, Role, SubjectData, SubjectForm, UserData};
use crate::subjects::{self, SubjectsModel};
use crate::users;
use crate::view::{bare, Empty, Payload, View};

pub const USERS_VIEW: &str = "users";
pub const REGISTER_USER_VIEW: &str = "admin/register-user";
pub const UPDATE_USER_VIEW: &str = "admin/update-user";
pub const UPDATE_PASSWORD_VIEW: &str = "admin/update-password";
pub const SUBJECTS_VIEW: &str = "admin/subjects";
pub const ADD_SUBJECT_VIEW: &str = "add-subject";
pub const UPDATE_SUBJECT_VIEW: &str = "update-subject";

#[derive(Debug, Serialize)]
pub struct UsersModel {
    users: Vec<UserData>,
}

async fn user_listing(pg: &PgPool) -> Result<View<UsersModel>, Error> {
    Ok(View::new(
        USERS_VIEW,
        UsersModel {
            users: users::all(pg).await?,
        },
    ))
}

pub async fn list_users(principal: Principal, Extension(pg): Extension<PgPool>) -> Payload<View<UsersModel>> {
    principal.require(Role::Admin)?;
    user_listing(&pg).await?.render()
}

pub async fn register_user_page(principal: Principal) -> Payload<View<Empty>> {
    principal.require(Role::Admin)?;
    bare(REGISTER_USER_VIEW)
}

pub async fn register_user(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<RegisterUser>,
) -> Payload<View<UsersModel>> {
    principal.require(Role::Admin)?;
    let mut errors = match form.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };
    if users::email_taken(&pg, &form.email, None).await? {
        errors.add("email", field_error("taken", EMAIL_TAKEN));
    }
    if !errors.errors().is_empty() {
        log::error!("Cannot save user, wrong input");
        return Err(Error::invalid(REGISTER_USER_VIEW, &errors));
    }

    let user = users::save_user(&pg, &form).await?;
    log::info!("User with ID {} successfully saved", user.id);
    user_listing(&pg).await?.render()
}

#[derive(Debug, Serialize)]
pub struct UserModel {
    user: UserData,
}

pub async fn update_user_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<UserModel>> {
    principal.require(Role::Admin)?;
    let user = users::find_or_404(&pg, id).await?;
    View::new(UPDATE_USER_VIEW, UserModel { user }).render()
}

/// Editing the acting administrator's own account re-issues their session.
pub async fn update_user(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Arc<Config>>,
    Json(form): Json<ProfileForm>,
) -> Result<Response, Error> {
    principal.require(Role::Admin)?;
    users::find_or_404(&pg, id).await?;
    let mut errors = match form.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };
    if users::email_taken(&pg, &form.email, Some(id)).await? {
        errors.add("email", field_error("taken", EMAIL_TAKEN));
    }
    if !errors.errors().is_empty() {
        log::error!("Cannot update user, wrong input");
        return Err(Error::invalid(UPDATE_USER_VIEW, &errors));
    }

    users::update_profile(&pg, id, &form).await?;
    log::info!("User with ID {} successfully updated", id);

    let view = user_listing(&pg).await?.success("User was successfully updated");
    if id == principal.id() {
        let cookie = auth::reissue_session(&pg, &principal, config.session_ttl()).await?;
        return Ok(auth::with_cookie(cookie, view)?.into_response());
    }
    Ok(view.render().into_response())
}

#[derive(Debug, Serialize)]
pub struct PasswordTargetModel {
    id: Uuid,
}

pub async fn update_password_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<PasswordTargetModel>> {
    principal.require(Role::Admin)?;
    users::find_or_404(&pg, id).await?;
    View::new(UPDATE_PASSWORD_VIEW, PasswordTargetModel { id }).render()
}

pub async fn update_password(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<NewPasswordForm>,
) -> Payload<View<PasswordTargetModel>> {
    principal.require(Role::Admin)?;
    let user = users::find_or_404(&pg, id).await?;
    if let Err(message) = users::check_new_password(&form.new_password, &user.password_hash) {
        log::error!("{}", users::UPDATE_PASSWORD_ERROR);
        return Err(users::password_rejected(UPDATE_PASSWORD_VIEW, "new_password", message));
    }

    users::update_password(&pg, id, &form.new_password).await?;
    log::info!("Password of user with ID {} successfully updated", id);
    View::new(UPDATE_PASSWORD_VIEW, PasswordTargetModel { id })
        .success("Successfully updated password")
        .render()
}

pub async fn delete_user(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<UsersModel>> {
    principal.require(Role::Admin)?;
    if !users::delete_user(&pg, id).await? {
        return Err(Error::not_found(format!("User with ID {} does not exist", id)));
    }
    log::info!("Successfully deleted user with ID: {}", id);
    user_listing(&pg).await?.render()
}

/// Roles an administrator may hand out or take away. STUDENT is permanent.
fn grantable(role: &str) -> Option<Role> {
    match role {
        "admin" => Some(Role::Admin),
        "tutor" => Some(Role::Tutor),
        _ => None,
    }
}

pub async fn change_role(
    principal: Principal,
    Path((action, role, id)): Path<(String, String, Uuid)>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<UsersModel>> {
    principal.require(Role::Admin)?;
    let role = grantable(&role).ok_or_else(|| Error::not_found(format!("Unknown role: {}", role)))?;
    users::find_or_404(&pg, id).await?;
    match action.as_str() {
        "add" => {
            users::grant_role(&pg, id, role).await?;
            log::info!("Successfully added {} role to user with ID: {}", role, id);
        }
        "remove" => {
            users::revoke_role(&pg, id, role).await?;
            log::info!("Successfully removed {} role from user with ID: {}", role, id);
        }
        other => return Err(Error::not_found(format!("Unknown role action: {}", other))),
    }
    user_listing(&pg).await?.render()
}

async fn set_active(principal: Principal, id: Uuid, pg: PgPool, active: bool) -> Payload<View<UsersModel>> {
    principal.require(Role::Admin)?;
    users::find_or_404(&pg, id).await?;
    users::set_active(&pg, id, active).await?;
    log::info!(
        "Successfully {} user with ID: {}",
        if active { "unblocked" } else { "blocked" },
        id
    );
    user_listing(&pg).await?.render()
}

pub async fn block_user(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<UsersModel>> {
    set_active(principal, id, pg, false).await
}

pub async fn unblock_user(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<UsersModel>> {
    set_active(principal, id, pg, true).await
}

pub async fn list_subjects(principal: Principal, Extension(pg): Extension<PgPool>) -> Payload<View<SubjectsModel>> {
    principal.require(Role::Admin)?;
    View::new(
        SUBJECTS_VIEW,
        SubjectsModel {
            subjects: subjects::all(&pg).await?,
        },
    )
    .render()
}

pub async fn add_subject_page(principal: Principal) -> Payload<View<Empty>> {
    principal.require(Role::Admin)?;
    bare(ADD_SUBJECT_VIEW)
}

pub async fn add_subject(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<SubjectForm>,
) -> Result<Redirect, Error> {
    principal.require(Role::Admin)?;
    if let Err(errors) = form.validate() {
        log::error!("Cannot save subject, wrong input");
        return Err(Error::invalid(ADD_SUBJECT_VIEW, &errors));
    }
    let subject = subjects::create(&pg, &form.name).await?;
    log::info!("Subject with ID {} successfully saved", subject.id);
    Ok(Redirect::to("/admin/subjects"))
}

#[derive(Debug, Serialize)]
pub struct SubjectModel {
    subject: SubjectData,
}

pub async fn update_subject_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<SubjectModel>> {
    principal.require(Role::Admin)?;
    let subject = subjects::find_or_404(&pg, id).await?;
    View::new(UPDATE_SUBJECT_VIEW, SubjectModel { subject }).render()
}

pub async fn update_subject(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<SubjectForm>,
) -> Result<Redirect, Error> {
    principal.require(Role::Admin)?;
    if let Err(errors) = form.validate() {
        log::error!("Cannot update subject, wrong input");
        return Err(Error::invalid(UPDATE_SUBJECT_VIEW, &errors));
    }
    if subjects::rename(&pg, id, &form.name).await?.is_none() {
        return Err(Error::not_found(format!("Subject with ID {} does not exist", id)));
    }
    log::info!("Subject with ID {} successfully updated", id);
    Ok(Redirect::to("/admin/subjects"))
}

pub async fn delete_subject(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Result<Redirect, Error> {
    principal.require(Role::Admin)?;
    subjects::delete_subject(&pg, id).await?;
    log::info!("Successfully deleted subject with ID: {}", id);
    Ok(Redirect::to("/admin/subjects"))
}

pub async fn delete_comment(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Result<Redirect, Error> {
    principal.require(Role::Admin)?;
    let comment = comments::find_or_404(&pg, id).await?;
    comments::delete(&pg, id).await?;
    log::info!("Successfully deleted comment with ID: {}", id);
    Ok(Redirect::to(&format!("/tutors/{}/comments", comment.tutor_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_tutor_are_grantable() {
        assert_eq!(grantable("admin"), Some(Role::Admin));
        assert_eq!(grantable("tutor"), Some(Role::Tutor));
        assert_eq!(grantable("student"), None);
        assert_eq!(grantable("ADMIN"), None);
    }
}
