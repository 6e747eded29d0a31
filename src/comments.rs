//! Feedback students leave on tutors.

use axum::extract::Path;
use axum::response::Redirect;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Principal;
use crate::err::Error;
use crate::models::{CommentData, CommentForm, UserData};
use crate::users;
use crate::view::{Payload, View};

pub const COMMENTS_VIEW: &str = "comments";
pub const MY_COMMENTS_VIEW: &str = "my-comments";
pub const UPDATE_COMMENT_VIEW: &str = "update-comment";

const COMMENT_SELECT: &str = "SELECT c.id, c.created_at, c.feedback, \
     c.tutor_id, t.name AS tutor_name, t.surname AS tutor_surname, \
     c.student_id, s.name AS student_name, s.surname AS student_surname \
     FROM comments c \
     JOIN users t ON t.id = c.tutor_id \
     JOIN users s ON s.id = c.student_id";

pub async fn about_tutor(pg: &PgPool, tutor_id: Uuid) -> Result<Vec<CommentData>, Error> {
    Ok(sqlx::query_as::<_, CommentData>(&format!(
        "{} WHERE c.tutor_id = $1 ORDER BY c.created_at DESC",
        COMMENT_SELECT
    ))
    .bind(tutor_id)
    .fetch_all(pg)
    .await?)
}

pub async fn written_by(pg: &PgPool, student_id: Uuid) -> Result<Vec<CommentData>, Error> {
    Ok(sqlx::query_as::<_, CommentData>(&format!(
        "{} WHERE c.student_id = $1 ORDER BY c.created_at DESC",
        COMMENT_SELECT
    ))
    .bind(student_id)
    .fetch_all(pg)
    .await?)
}

pub async fn find_by_id(pg: &PgPool, id: Uuid) -> Result<Option<CommentData>, Error> {
    Ok(sqlx::query_as::<_, CommentData>(&format!("{} WHERE c.id = $1", COMMENT_SELECT))
        .bind(id)
        .fetch_optional(pg)
        .await?)
}

pub async fn find_or_404(pg: &PgPool, id: Uuid) -> Result<CommentData, Error> {
    find_by_id(pg, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Comment with ID {} does not exist", id)))
}

pub async fn save(pg: &PgPool, tutor_id: Uuid, student_id: Uuid, feedback: &str) -> Result<Uuid, Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO comments (id, created_at, feedback, tutor_id, student_id) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(Utc::now())
    .bind(feedback)
    .bind(tutor_id)
    .bind(student_id)
    .execute(pg)
    .await?;
    Ok(id)
}

/// Rewrites the feedback and stamps the comment with the edit time.
pub async fn update(pg: &PgPool, id: Uuid, feedback: &str) -> Result<(), Error> {
    sqlx::query("UPDATE comments SET feedback = $2, created_at = $3 WHERE id = $1")
        .bind(id)
        .bind(feedback)
        .bind(Utc::now())
        .execute(pg)
        .await?;
    Ok(())
}

pub async fn delete(pg: &PgPool, id: Uuid) -> Result<bool, Error> {
    let res = sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id)
        .execute(pg)
        .await?;
    Ok(res.rows_affected() >= 1)
}

/// Only tutors can be commented on; anyone else reads as missing.
async fn tutor_or_404(pg: &PgPool, id: Uuid) -> Result<UserData, Error> {
    match users::find_by_id(pg, id).await? {
        Some(user) if user.roles.is_tutor() => Ok(user),
        _ => Err(Error::not_found(format!("Tutor with ID {} does not exist", id))),
    }
}

async fn authored(pg: &PgPool, principal: &Principal, id: Uuid) -> Result<CommentData, Error> {
    let comment = find_or_404(pg, id).await?;
    if comment.student_id != principal.id() {
        return Err(Error::forbidden(format!("Comment with ID {} was written by someone else", id)));
    }
    Ok(comment)
}

#[derive(Debug, Serialize)]
pub struct CommentsModel {
    tutor: UserData,
    comments: Vec<CommentData>,
}

pub async fn tutor_comments(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<CommentsModel>> {
    let tutor = tutor_or_404(&pg, id).await?;
    log::info!("User {} searching for all comments about tutor with ID: {}", principal.id(), id);
    View::new(
        COMMENTS_VIEW,
        CommentsModel {
            comments: about_tutor(&pg, id).await?,
            tutor,
        },
    )
    .render()
}

pub async fn add_comment(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<CommentForm>,
) -> Result<Redirect, Error> {
    tutor_or_404(&pg, id).await?;
    if id == principal.id() {
        return Err(Error::forbidden("You cannot comment on yourself"));
    }
    if let Err(errors) = form.validate() {
        log::error!("Cannot save comment, wrong input");
        return Err(Error::invalid(COMMENTS_VIEW, &errors));
    }

    let comment = save(&pg, id, principal.id(), &form.feedback).await?;
    log::info!("Comment with ID {} successfully saved", comment);
    Ok(Redirect::to(&format!("/tutors/{}/comments", id)))
}

#[derive(Debug, Serialize)]
pub struct MyCommentsModel {
    received: Vec<CommentData>,
    created: Vec<CommentData>,
}

pub async fn my_comments(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<MyCommentsModel>> {
    View::new(
        MY_COMMENTS_VIEW,
        MyCommentsModel {
            received: about_tutor(&pg, principal.id()).await?,
            created: written_by(&pg, principal.id()).await?,
        },
    )
    .render()
}

#[derive(Debug, Serialize)]
pub struct CommentModel {
    comment: CommentData,
}

pub async fn update_comment_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<CommentModel>> {
    let comment = authored(&pg, &principal, id).await?;
    View::new(UPDATE_COMMENT_VIEW, CommentModel { comment }).render()
}

pub async fn update_comment(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<CommentForm>,
) -> Result<Redirect, Error> {
    authored(&pg, &principal, id).await?;
    if let Err(errors) = form.validate() {
        log::error!("Cannot update comment, wrong input");
        return Err(Error::invalid(UPDATE_COMMENT_VIEW, &errors));
    }
    update(&pg, id, &form.feedback).await?;
    log::info!("Comment with ID {} successfully updated", id);
    Ok(Redirect::to("/my-comments"))
}

pub async fn delete_comment(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Result<Redirect, Error> {
    authored(&pg, &principal, id).await?;
    delete(&pg, id).await?;
    log::info!("Successfully deleted comment with ID: {}", id);
    Ok(Redirect::to("/my-comments"))
}
