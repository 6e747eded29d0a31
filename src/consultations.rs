//! Consultation storage and the handlers that drive the scheduling rules.
//!
//! Only the future listing is public; past consultations and single
//! consultation pages are for logged-in users.

use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::addresses;
use crate::auth::Principal;
use crate::err::Error;
use crate::models::{AddressData, ConsultationData, ConsultationForm, Role, SubjectData};
use crate::scheduler::{self, Capacity, Mutation, Refusal, Schedule, Temporal};
use crate::subjects;
use crate::view::{Payload, View};

pub const CONSULTATION_VIEW: &str = "consultation";
pub const CONSULTATIONS_VIEW: &str = "consultations";
pub const ADD_CONSULTATION_VIEW: &str = "add-consultation";
pub const UPDATE_CONSULTATION_VIEW: &str = "update-consultation";

const CONSULTATION_SELECT: &str = "SELECT c.id, c.description, c.max_students, c.date_time, \
     c.subject_id, s.name AS subject_name, \
     c.tutor_id, t.name AS tutor_name, t.surname AS tutor_surname, \
     c.address_id, a.country, a.city, a.street, a.street_number, \
     ARRAY(SELECT cs.student_id FROM consultation_students cs WHERE cs.consultation_id = c.id) AS students \
     FROM consultations c \
     JOIN subjects s ON s.id = c.subject_id \
     JOIN users t ON t.id = c.tutor_id \
     JOIN addresses a ON a.id = c.address_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Subject(Uuid),
    Tutor(Uuid),
    /// Consultations the user is registered to.
    Student(Uuid),
}

impl Scope {
    fn filter(&self) -> (&'static str, Option<Uuid>) {
        match self {
            Scope::All => ("", None),
            Scope::Subject(id) => (" WHERE c.subject_id = $1", Some(*id)),
            Scope::Tutor(id) => (" WHERE c.tutor_id = $1", Some(*id)),
            Scope::Student(id) => (
                " WHERE EXISTS (SELECT 1 FROM consultation_students cs \
                 WHERE cs.consultation_id = c.id AND cs.student_id = $1)",
                Some(*id),
            ),
        }
    }
}

pub async fn list(pg: &PgPool, scope: Scope) -> Result<Vec<ConsultationData>, Error> {
    let (filter, id) = scope.filter();
    let sql = format!("{}{} ORDER BY c.date_time", CONSULTATION_SELECT, filter);
    let mut query = sqlx::query_as::<_, ConsultationData>(&sql);
    if let Some(id) = id {
        query = query.bind(id);
    }
    Ok(query.fetch_all(pg).await?)
}

pub async fn find_by_id(pg: &PgPool, id: Uuid) -> Result<Option<ConsultationData>, Error> {
    Ok(sqlx::query_as::<_, ConsultationData>(&format!("{} WHERE c.id = $1", CONSULTATION_SELECT))
        .bind(id)
        .fetch_optional(pg)
        .await?)
}

pub async fn find_or_404(pg: &PgPool, id: Uuid) -> Result<ConsultationData, Error> {
    find_by_id(pg, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Consultation with ID {} does not exist", id)))
}

pub async fn insert(pg: &PgPool, tutor_id: Uuid, schedule: &Schedule) -> Result<Uuid, Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO consultations (id, description, max_students, date_time, subject_id, tutor_id, address_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id)
    .bind(&schedule.description)
    .bind(schedule.max_students)
    .bind(schedule.date_time)
    .bind(schedule.subject_id)
    .bind(tutor_id)
    .bind(schedule.address_id)
    .execute(pg)
    .await?;
    Ok(id)
}

/// Rewrites the editable fields. Tutor and registered students stay as stored.
pub async fn update(pg: &PgPool, id: Uuid, schedule: &Schedule) -> Result<(), Error> {
    sqlx::query(
        "UPDATE consultations SET description = $2, max_students = $3, date_time = $4, \
         subject_id = $5, address_id = $6 WHERE id = $1",
    )
    .bind(id)
    .bind(&schedule.description)
    .bind(schedule.max_students)
    .bind(schedule.date_time)
    .bind(schedule.subject_id)
    .bind(schedule.address_id)
    .execute(pg)
    .await?;
    Ok(())
}

pub async fn delete(pg: &PgPool, id: Uuid) -> Result<bool, Error> {
    let mut tx = pg.begin().await?;
    sqlx::query("DELETE FROM consultation_students WHERE consultation_id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    let res = sqlx::query("DELETE FROM consultations WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() >= 1)
}

/// Loads the consultation with its row locked for the rest of `tx`, so
/// concurrent sign-ups queue up behind the capacity check.
async fn lock(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<ConsultationData, Error> {
    let locked = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM consultations WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if locked.is_none() {
        return Err(Error::not_found(format!("Consultation with ID {} does not exist", id)));
    }
    Ok(sqlx::query_as::<_, ConsultationData>(&format!("{} WHERE c.id = $1", CONSULTATION_SELECT))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?)
}

/// Result of a sign-up change: the consultation as it stands afterwards and
/// the refusal, if the change was turned down.
pub type Outcome = (ConsultationData, Option<Refusal>);

pub async fn register(pg: &PgPool, id: Uuid, student: Uuid, now: DateTime<Utc>) -> Result<Outcome, Error> {
    let mut tx = pg.begin().await?;
    let mut consultation = lock(&mut tx, id).await?;
    if let Err(refusal) = scheduler::admit(&consultation, student, now) {
        return Ok((consultation, Some(refusal)));
    }
    sqlx::query("INSERT INTO consultation_students (consultation_id, student_id) VALUES ($1, $2)")
        .bind(id)
        .bind(student)
        .execute(&mut tx)
        .await?;
    tx.commit().await?;
    consultation.students.push(student);
    Ok((consultation, None))
}

pub async fn unregister(pg: &PgPool, id: Uuid, student: Uuid, now: DateTime<Utc>) -> Result<Outcome, Error> {
    let mut tx = pg.begin().await?;
    let mut consultation = lock(&mut tx, id).await?;
    if let Err(refusal) = scheduler::release(&consultation, student, now) {
        return Ok((consultation, Some(refusal)));
    }
    sqlx::query("DELETE FROM consultation_students WHERE consultation_id = $1 AND student_id = $2")
        .bind(id)
        .bind(student)
        .execute(&mut tx)
        .await?;
    tx.commit().await?;
    consultation.students.retain(|s| *s != student);
    Ok((consultation, None))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Attendee {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
}

async fn attendees(pg: &PgPool, id: Uuid) -> Result<Vec<Attendee>, Error> {
    Ok(sqlx::query_as::<_, Attendee>(
        "SELECT u.id, u.name, u.surname FROM users u \
         JOIN consultation_students cs ON cs.student_id = u.id \
         WHERE cs.consultation_id = $1 ORDER BY u.surname, u.name",
    )
    .bind(id)
    .fetch_all(pg)
    .await?)
}

#[derive(Debug, Serialize)]
pub struct ConsultationModel {
    consultation: ConsultationData,
    temporal: Temporal,
    capacity: Capacity,
    registered: bool,
    students: Vec<Attendee>,
}

async fn read_view(
    pg: &PgPool,
    consultation: ConsultationData,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<View<ConsultationModel>, Error> {
    let students = attendees(pg, consultation.id).await?;
    Ok(View::new(
        CONSULTATION_VIEW,
        ConsultationModel {
            temporal: consultation.temporal(now),
            capacity: consultation.capacity(),
            registered: consultation.has_student(principal.id()),
            consultation,
            students,
        },
    ))
}

#[derive(Debug, Serialize)]
pub struct ConsultationsModel {
    title: String,
    consultations: Vec<ConsultationData>,
}

pub fn listing(title: impl Into<String>, consultations: Vec<ConsultationData>) -> View<ConsultationsModel> {
    View::new(
        CONSULTATIONS_VIEW,
        ConsultationsModel {
            title: title.into(),
            consultations,
        },
    )
}

async fn future_listing(pg: &PgPool) -> Result<View<ConsultationsModel>, Error> {
    let (future, _) = scheduler::partition(list(pg, Scope::All).await?, Utc::now());
    Ok(listing("Future Consultations", future))
}

pub async fn future_consultations(Extension(pg): Extension<PgPool>) -> Payload<View<ConsultationsModel>> {
    log::info!("Searching for all future consultations in the database");
    future_listing(&pg).await?.render()
}

pub async fn past_consultations(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationsModel>> {
    log::info!("User {} searching for all past consultations", principal.id());
    let (_, past) = scheduler::partition(list(&pg, Scope::All).await?, Utc::now());
    listing("Past Consultations", past).render()
}

#[derive(Debug, Serialize)]
pub struct MyConsultationsModel {
    title: &'static str,
    created: Vec<ConsultationData>,
    registered: Vec<ConsultationData>,
}

pub async fn my_consultations(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<MyConsultationsModel>> {
    let created = if principal.has_role(Role::Tutor) {
        list(&pg, Scope::Tutor(principal.id())).await?
    } else {
        Vec::new()
    };
    View::new(
        CONSULTATIONS_VIEW,
        MyConsultationsModel {
            title: "My Consultations",
            created,
            registered: list(&pg, Scope::Student(principal.id())).await?,
        },
    )
    .render()
}

pub async fn show_consultation(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationModel>> {
    log::info!("Searching for consultation with ID: {}", id);
    let consultation = find_or_404(&pg, id).await?;
    read_view(&pg, consultation, &principal, Utc::now()).await?.render()
}

#[derive(Debug, Serialize)]
pub struct ConsultationFormModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    consultation: Option<ConsultationData>,
    subjects: Vec<SubjectData>,
    addresses: Vec<AddressData>,
}

pub async fn add_consultation_page(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationFormModel>> {
    principal.require(Role::Tutor)?;
    View::new(
        ADD_CONSULTATION_VIEW,
        ConsultationFormModel {
            consultation: None,
            subjects: subjects::all(&pg).await?,
            addresses: addresses::owned_by(&pg, principal.id()).await?,
        },
    )
    .render()
}

pub async fn add_consultation(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<ConsultationForm>,
) -> Payload<View<ConsultationsModel>> {
    principal.require(Role::Tutor)?;
    let subjects = subjects::all(&pg).await?;
    let addresses = addresses::owned_by(&pg, principal.id()).await?;
    let schedule = scheduler::check_schedule(&form, &subjects, &addresses, 0, Utc::now()).map_err(|errors| {
        log::error!("Cannot save consultation, wrong input");
        Error::invalid(ADD_CONSULTATION_VIEW, &errors)
    })?;

    let id = insert(&pg, principal.id(), &schedule).await?;
    log::info!("Consultation with ID {} successfully saved", id);
    future_listing(&pg)
        .await?
        .success("Consultation was successfully added")
        .render()
}

pub async fn update_consultation_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Result<Response, Error> {
    let now = Utc::now();
    let consultation = find_or_404(&pg, id).await?;
    scheduler::authorize(&consultation, &principal.user)?;
    if let Some(warning) = scheduler::frozen(&consultation, Mutation::Update, &principal.user, now) {
        return Ok(read_view(&pg, consultation, &principal, now)
            .await?
            .warning(warning)
            .render()
            .into_response());
    }

    let addresses = addresses::owned_by(&pg, consultation.tutor_id).await?;
    Ok(View::new(
        UPDATE_CONSULTATION_VIEW,
        ConsultationFormModel {
            consultation: Some(consultation),
            subjects: subjects::all(&pg).await?,
            addresses,
        },
    )
    .render()
    .into_response())
}

pub async fn update_consultation(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<ConsultationForm>,
) -> Payload<View<ConsultationModel>> {
    let now = Utc::now();
    let consultation = find_or_404(&pg, id).await?;
    if let Some(warning) = scheduler::review_update(&consultation, form.id, &principal.user, now)? {
        log::warn!("Refused to update past consultation with ID: {}", id);
        return read_view(&pg, consultation, &principal, now).await?.warning(warning).render();
    }

    let subjects = subjects::all(&pg).await?;
    let addresses = addresses::owned_by(&pg, consultation.tutor_id).await?;
    let registered = consultation.students.len();
    let schedule = scheduler::check_schedule(&form, &subjects, &addresses, registered, now).map_err(|errors| {
        log::error!("Cannot update consultation, wrong input");
        Error::invalid(UPDATE_CONSULTATION_VIEW, &errors)
    })?;

    update(&pg, id, &schedule).await?;
    log::info!("Consultation with ID {} successfully updated", id);
    let consultation = find_or_404(&pg, id).await?;
    read_view(&pg, consultation, &principal, now)
        .await?
        .success("Consultation was successfully updated")
        .render()
}

pub async fn delete_consultation(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Result<Response, Error> {
    let now = Utc::now();
    let consultation = find_or_404(&pg, id).await?;
    if let Some(warning) = scheduler::review_delete(&consultation, &principal.user, now)? {
        log::warn!("Refused to delete past consultation with ID: {}", id);
        return Ok(read_view(&pg, consultation, &principal, now)
            .await?
            .warning(warning)
            .render()
            .into_response());
    }

    delete(&pg, id).await?;
    log::info!("Successfully deleted consultation with ID: {}", id);
    Ok(future_listing(&pg)
        .await?
        .success(format!("Consultation with ID {} was successfully deleted", id))
        .render()
        .into_response())
}

pub async fn register_to(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationModel>> {
    let now = Utc::now();
    let (consultation, refusal) = register(&pg, id, principal.id(), now).await?;
    let view = read_view(&pg, consultation, &principal, now).await?;
    match refusal {
        Some(refusal) => {
            log::warn!("User {} not registered to consultation {}: {}", principal.id(), id, refusal.message());
            view.warning(refusal.message()).render()
        }
        None => {
            log::info!("User {} registered to consultation {}", principal.id(), id);
            view.success("You have successfully registered to this consultation").render()
        }
    }
}

pub async fn unregister_from(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<ConsultationModel>> {
    let now = Utc::now();
    let (consultation, refusal) = unregister(&pg, id, principal.id(), now).await?;
    let view = read_view(&pg, consultation, &principal, now).await?;
    match refusal {
        Some(refusal) => view.warning(refusal.message()).render(),
        None => {
            log::info!("User {} unregistered from consultation {}", principal.id(), id);
            view.success("You have successfully unregistered from this consultation").render()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressForm, RegisterUser, UserData};
    use crate::users;
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn scopes_bind_their_id() {
        let id = Uuid::new_v4();
        assert_eq!(Scope::All.filter(), ("", None));
        let (sql, bound) = Scope::Tutor(id).filter();
        assert!(sql.contains("c.tutor_id = $1"));
        assert_eq!(bound, Some(id));
        let (sql, _) = Scope::Student(id).filter();
        assert!(sql.contains("consultation_students"));
    }

    #[test]
    fn listing_names_consultations_view() {
        let view = listing("Future Consultations", Vec::new());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["view"], CONSULTATIONS_VIEW);
        assert_eq!(json["title"], "Future Consultations");
        assert_eq!(json["consultations"], serde_json::json!([]));
    }

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pg = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pg).await.unwrap();
        pg
    }

    async fn user(pg: &PgPool, name: &str) -> UserData {
        users::save_user(
            pg,
            &RegisterUser {
                name: name.into(),
                surname: "Tester".into(),
                email: format!("{}@portal.io", Uuid::new_v4()),
                password: "secret1".into(),
            },
        )
        .await
        .unwrap()
    }

    /// A tutor with one future consultation for two students.
    async fn scheduled(pg: &PgPool) -> (UserData, Schedule, Uuid) {
        let tutor = user(pg, "Richard").await;
        users::grant_role(pg, tutor.id, Role::Tutor).await.unwrap();
        let subject = subjects::create(pg, &format!("Physics {}", Uuid::new_v4())).await.unwrap();
        let address = addresses::insert(
            pg,
            tutor.id,
            &AddressForm {
                country: "USA".into(),
                city: "Pasadena".into(),
                street: "California Blvd".into(),
                street_number: "1200".into(),
            },
        )
        .await
        .unwrap();
        let schedule = Schedule {
            description: "Path integrals for the curious undergraduate".into(),
            max_students: 2,
            date_time: Utc::now() + Duration::days(7),
            subject_id: subject.id,
            address_id: address.id,
        };
        let id = insert(pg, tutor.id, &schedule).await.unwrap();
        (tutor, schedule, id)
    }

    async fn students_of(pg: &PgPool, id: Uuid) -> i64 {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM consultation_students WHERE consultation_id = $1",
        )
        .bind(id)
        .fetch_one(pg)
        .await
        .unwrap();
        count
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn third_student_is_refused_when_two_places_are_taken() {
        let pg = pool().await;
        let (tutor, _, id) = scheduled(&pg).await;
        let (a, b, c) = (user(&pg, "Ann").await, user(&pg, "Ben").await, user(&pg, "Cat").await);
        let now = Utc::now();

        let (_, refusal) = register(&pg, id, tutor.id, now).await.unwrap();
        assert_eq!(refusal, Some(Refusal::OwnConsultation));

        assert_eq!(register(&pg, id, a.id, now).await.unwrap().1, None);
        let (after_b, refusal) = register(&pg, id, b.id, now).await.unwrap();
        assert_eq!(refusal, None);
        assert_eq!(after_b.capacity(), Capacity::Full);

        let (after_c, refusal) = register(&pg, id, c.id, now).await.unwrap();
        assert_eq!(refusal, Some(Refusal::CapacityExceeded));
        assert!(!after_c.has_student(c.id));
        assert_eq!(students_of(&pg, id).await, 2);

        let (_, refusal) = unregister(&pg, id, c.id, now).await.unwrap();
        assert_eq!(refusal, Some(Refusal::NotRegistered));
        let (after_a, refusal) = unregister(&pg, id, a.id, now).await.unwrap();
        assert_eq!(refusal, None);
        assert_eq!(after_a.students, vec![b.id]);
        assert_eq!(students_of(&pg, id).await, 1);

        assert!(matches!(
            register(&pg, Uuid::new_v4(), a.id, now).await,
            Err(Error::NotFound { .. })
        ));

        for u in [a, b, c, tutor] {
            users::delete_user(&pg, u.id).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn update_keeps_students_and_delete_drops_them() {
        let pg = pool().await;
        let (tutor, mut schedule, id) = scheduled(&pg).await;
        let student = user(&pg, "Dora").await;
        register(&pg, id, student.id, Utc::now()).await.unwrap();

        schedule.description = "Path integrals, second sitting with exercises".into();
        schedule.max_students = 5;
        update(&pg, id, &schedule).await.unwrap();
        let updated = find_or_404(&pg, id).await.unwrap();
        assert_eq!(updated.max_students, 5);
        assert_eq!(updated.description, schedule.description);
        assert_eq!(updated.students, vec![student.id]);
        assert_eq!(updated.tutor_id, tutor.id);

        assert!(delete(&pg, id).await.unwrap());
        assert_eq!(students_of(&pg, id).await, 0);
        assert!(find_by_id(&pg, id).await.unwrap().is_none());
        assert!(!delete(&pg, id).await.unwrap());

        users::delete_user(&pg, student.id).await.unwrap();
        users::delete_user(&pg, tutor.id).await.unwrap();
    }
}
