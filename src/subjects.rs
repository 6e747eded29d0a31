//! The subject catalog. The list itself is public, the pages of a single
//! subject need a login.

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Principal;
use crate::consultations::{self, ConsultationsModel, Scope};
use crate::err::Error;
use crate::models::{Role, SubjectData, SubjectSelection, UserData};
use crate::scheduler;
use crate::view::{Payload, View};

pub const SUBJECTS_VIEW: &str = "subjects";
pub const SELECT_SUBJECTS_VIEW: &str = "select-subjects";

pub async fn all(pg: &PgPool) -> Result<Vec<SubjectData>, Error> {
    Ok(sqlx::query_as::<_, SubjectData>("SELECT id, name FROM subjects ORDER BY name")
        .fetch_all(pg)
        .await?)
}

pub async fn find_by_id(pg: &PgPool, id: Uuid) -> Result<Option<SubjectData>, Error> {
    Ok(sqlx::query_as::<_, SubjectData>("SELECT id, name FROM subjects WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await?)
}

pub async fn find_or_404(pg: &PgPool, id: Uuid) -> Result<SubjectData, Error> {
    find_by_id(pg, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Subject with ID {} does not exist", id)))
}

pub async fn create(pg: &PgPool, name: &str) -> Result<SubjectData, Error> {
    Ok(sqlx::query_as::<_, SubjectData>(
        "INSERT INTO subjects (id, name) VALUES ($1, $2) RETURNING id, name",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pg)
    .await?)
}

pub async fn rename(pg: &PgPool, id: Uuid, name: &str) -> Result<Option<SubjectData>, Error> {
    Ok(sqlx::query_as::<_, SubjectData>(
        "UPDATE subjects SET name = $2 WHERE id = $1 RETURNING id, name",
    )
    .bind(id)
    .bind(name)
    .fetch_optional(pg)
    .await?)
}

/// Strips the subject from every tutor's taught set, then removes it. A
/// subject that consultations still point at is kept and reported as a
/// conflict; a missing one as not found.
pub async fn delete_subject(pg: &PgPool, id: Uuid) -> Result<(), Error> {
    let mut tx = pg.begin().await?;
    let exists = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM subjects WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut tx)
        .await?;
    if exists.is_none() {
        return Err(Error::not_found(format!("Subject with ID {} does not exist", id)));
    }

    let (in_use,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM consultations WHERE subject_id = $1")
        .bind(id)
        .fetch_one(&mut tx)
        .await?;
    if in_use > 0 {
        return Err(Error::Conflict {
            message: format!("Subject with ID {} is used by {} consultation(s)", id, in_use),
        });
    }

    sqlx::query("DELETE FROM user_subjects WHERE subject_id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM subjects WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn taught_by(pg: &PgPool, user_id: Uuid) -> Result<Vec<SubjectData>, Error> {
    Ok(sqlx::query_as::<_, SubjectData>(
        "SELECT s.id, s.name FROM subjects s \
         JOIN user_subjects us ON us.subject_id = s.id \
         WHERE us.user_id = $1 ORDER BY s.name",
    )
    .bind(user_id)
    .fetch_all(pg)
    .await?)
}

/// Replaces the taught set with the known subjects among `subject_ids`;
/// unknown ids are skipped.
pub async fn replace_taught(pg: &PgPool, user_id: Uuid, subject_ids: &[Uuid]) -> Result<(), Error> {
    let mut tx = pg.begin().await?;
    sqlx::query("DELETE FROM user_subjects WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut tx)
        .await?;
    sqlx::query(
        "INSERT INTO user_subjects (user_id, subject_id) \
         SELECT $1, s.id FROM subjects s WHERE s.id = ANY($2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(subject_ids)
    .execute(&mut tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SubjectsModel {
    pub subjects: Vec<SubjectData>,
}

pub async fn list_subjects(Extension(pg): Extension<PgPool>) -> Payload<View<SubjectsModel>> {
    log::info!("Searching for all subjects in the database");
    View::new(SUBJECTS_VIEW, SubjectsModel { subjects: all(&pg).await? }).render()
}

#[derive(Debug, Serialize)]
pub struct TutorsModel {
    pub title: String,
    pub tutors: Vec<UserData>,
}

pub async fn subject_tutors(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<TutorsModel>> {
    let subject = find_or_404(&pg, id).await?;
    log::info!("User {} searching for all tutors by subject: {}", principal.id(), subject.name);
    View::new(
        crate::tutors::TUTORS_VIEW,
        TutorsModel {
            title: format!("Tutors teaching {}", subject.name),
            tutors: crate::users::tutors_of_subject(&pg, id).await?,
        },
    )
    .render()
}

pub async fn subject_consultations(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationsModel>> {
    let subject = find_or_404(&pg, id).await?;
    log::info!(
        "User {} searching for all future consultations by subject: {}",
        principal.id(),
        subject.name
    );
    let (future, _) = scheduler::partition(consultations::list(&pg, Scope::Subject(id)).await?, Utc::now());
    consultations::listing(format!("Future Consultations in {}", subject.name), future).render()
}

#[derive(Debug, Serialize)]
pub struct SelectSubjectsModel {
    subjects: Vec<SubjectData>,
    my_subjects: Vec<SubjectData>,
}

pub async fn my_subjects_page(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<SelectSubjectsModel>> {
    principal.require(Role::Tutor)?;
    View::new(
        SELECT_SUBJECTS_VIEW,
        SelectSubjectsModel {
            subjects: all(&pg).await?,
            my_subjects: taught_by(&pg, principal.id()).await?,
        },
    )
    .render()
}

pub async fn update_my_subjects(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Json(selection): Json<SubjectSelection>,
) -> Payload<View<SelectSubjectsModel>> {
    principal.require(Role::Tutor)?;
    replace_taught(&pg, principal.id(), &selection.subject_ids).await?;
    log::info!("Successfully updated subjects list for user with ID: {}", principal.id());
    View::new(
        SELECT_SUBJECTS_VIEW,
        SelectSubjectsModel {
            subjects: all(&pg).await?,
            my_subjects: taught_by(&pg, principal.id()).await?,
        },
    )
    .success("You have successfully updated your subjects")
    .render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegisterUser;
    use crate::users;
    use sqlx::postgres::PgPoolOptions;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pg = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pg).await.unwrap();
        pg
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn deleting_subject_strips_it_from_tutors() {
        let pg = pool().await;
        let tutor = users::save_user(
            &pg,
            &RegisterUser {
                name: "Emmy".into(),
                surname: "Noether".into(),
                email: format!("{}@portal.io", Uuid::new_v4()),
                password: "symmetry".into(),
            },
        )
        .await
        .unwrap();
        users::grant_role(&pg, tutor.id, Role::Tutor).await.unwrap();

        let algebra = create(&pg, "Abstract algebra").await.unwrap();
        let stray = Uuid::new_v4();
        replace_taught(&pg, tutor.id, &[algebra.id, stray]).await.unwrap();
        assert_eq!(taught_by(&pg, tutor.id).await.unwrap(), vec![algebra.clone()]);

        delete_subject(&pg, algebra.id).await.unwrap();
        assert!(taught_by(&pg, tutor.id).await.unwrap().is_empty());
        assert!(matches!(
            delete_subject(&pg, algebra.id).await,
            Err(Error::NotFound { .. })
        ));

        users::delete_user(&pg, tutor.id).await.unwrap();
    }
}
