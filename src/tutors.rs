//! The tutor list is public, a single tutor's pages need a login.

use axum::extract::Path;
use axum::Extension;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Principal;
use crate::consultations::{self, ConsultationsModel, Scope};
use crate::err::Error;
use crate::scheduler;
use crate::subjects::TutorsModel;
use crate::users;
use crate::view::{Payload, View};

pub const TUTORS_VIEW: &str = "tutors";

pub async fn list_tutors(Extension(pg): Extension<PgPool>) -> Payload<View<TutorsModel>> {
    log::info!("Searching for all tutors in the database");
    View::new(
        TUTORS_VIEW,
        TutorsModel {
            title: "Tutors".to_string(),
            tutors: users::tutors(&pg).await?,
        },
    )
    .render()
}

pub async fn tutor_consultations(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationsModel>> {
    let tutor = match users::find_by_id(&pg, id).await? {
        Some(user) if user.roles.is_tutor() => user,
        _ => return Err(Error::not_found(format!("Tutor with ID {} does not exist", id))),
    };
    log::info!("User {} searching for future consultations of tutor with ID: {}", principal.id(), id);
    let (future, _) = scheduler::partition(consultations::list(&pg, Scope::Tutor(id)).await?, Utc::now());
    consultations::listing(
        format!("Future Consultations with {} {}", tutor.name, tutor.surname),
        future,
    )
    .render()
}
