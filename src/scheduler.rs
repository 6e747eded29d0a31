//! Consultation rules: time windows, capacity, ownership.
//!
//! Nothing here touches the database or the clock. Callers load the
//! consultation, pass `now` in and persist whatever the rules allow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::err::{field_error, Error};
use crate::models::{AddressData, ConsultationData, ConsultationForm, SubjectData, UserData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporal {
    Future,
    Past,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capacity {
    Open,
    Full,
}

impl ConsultationData {
    /// Only a date strictly after `now` counts as future.
    pub fn temporal(&self, now: DateTime<Utc>) -> Temporal {
        if self.date_time > now {
            Temporal::Future
        } else {
            Temporal::Past
        }
    }

    pub fn capacity(&self) -> Capacity {
        if self.students.len() as i64 >= i64::from(self.max_students) {
            Capacity::Full
        } else {
            Capacity::Open
        }
    }

    pub fn has_student(&self, user_id: Uuid) -> bool {
        self.students.contains(&user_id)
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.tutor_id == user_id
    }
}

/// Why a registration change was turned down. These surface as warnings on
/// the consultation view, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    PastRegister,
    PastUnregister,
    OwnConsultation,
    AlreadyRegistered,
    CapacityExceeded,
    NotRegistered,
}

impl Refusal {
    pub fn message(&self) -> &'static str {
        match self {
            Refusal::PastRegister => "You cannot register to past consultation",
            Refusal::PastUnregister => "You cannot unregister from past consultation",
            Refusal::OwnConsultation => "You cannot register to your own consultation",
            Refusal::AlreadyRegistered => "You are already registered to this consultation",
            Refusal::CapacityExceeded => {
                "Cannot register, maximum number of students will be exceeded"
            }
            Refusal::NotRegistered => "You are not registered to this consultation",
        }
    }
}

/// Checks whether `student` may join. Order matters: a past consultation is
/// reported as past even when it is also full.
pub fn admit(
    consultation: &ConsultationData,
    student: Uuid,
    now: DateTime<Utc>,
) -> Result<(), Refusal> {
    if consultation.temporal(now) == Temporal::Past {
        return Err(Refusal::PastRegister);
    }
    if consultation.is_owned_by(student) {
        return Err(Refusal::OwnConsultation);
    }
    if consultation.has_student(student) {
        return Err(Refusal::AlreadyRegistered);
    }
    if consultation.capacity() == Capacity::Full {
        return Err(Refusal::CapacityExceeded);
    }
    Ok(())
}

pub fn release(
    consultation: &ConsultationData,
    student: Uuid,
    now: DateTime<Utc>,
) -> Result<(), Refusal> {
    if consultation.temporal(now) == Temporal::Past {
        return Err(Refusal::PastUnregister);
    }
    if !consultation.has_student(student) {
        return Err(Refusal::NotRegistered);
    }
    Ok(())
}

/// The tutor who created a consultation and any administrator may change it.
pub fn authorize(consultation: &ConsultationData, actor: &UserData) -> Result<(), Error> {
    if consultation.is_owned_by(actor.id) || actor.roles.is_admin() {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "Consultation with ID {} does not belong to you",
            consultation.id
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Update,
    Delete,
}

pub const PAST_UPDATE_WARNING: &str = "You cannot update past consultation";
pub const PAST_DELETE_WARNING: &str = "You cannot delete past consultation";

/// Past consultations are frozen. Administrators keep the right to delete
/// them but, like everybody else, cannot edit them.
pub fn frozen(
    consultation: &ConsultationData,
    mutation: Mutation,
    actor: &UserData,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    if consultation.temporal(now) == Temporal::Future {
        return None;
    }
    match mutation {
        Mutation::Update => Some(PAST_UPDATE_WARNING),
        Mutation::Delete if actor.roles.is_admin() => None,
        Mutation::Delete => Some(PAST_DELETE_WARNING),
    }
}

/// Gates an update of a stored consultation. Forbidden comes before
/// Conflict, and a body id that is missing or names another consultation is
/// a Conflict. `Ok(Some(warning))` means the consultation is frozen and only
/// its read view may be shown.
pub fn review_update(
    consultation: &ConsultationData,
    form_id: Option<Uuid>,
    actor: &UserData,
    now: DateTime<Utc>,
) -> Result<Option<&'static str>, Error> {
    authorize(consultation, actor)?;
    if form_id != Some(consultation.id) {
        return Err(Error::Conflict {
            message: format!(
                "Consultation ID in the form does not match ID {}",
                consultation.id
            ),
        });
    }
    Ok(frozen(consultation, Mutation::Update, actor, now))
}

pub fn review_delete(
    consultation: &ConsultationData,
    actor: &UserData,
    now: DateTime<Utc>,
) -> Result<Option<&'static str>, Error> {
    authorize(consultation, actor)?;
    Ok(frozen(consultation, Mutation::Delete, actor, now))
}

/// A consultation form that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub description: String,
    pub max_students: i32,
    pub date_time: DateTime<Utc>,
    pub subject_id: Uuid,
    pub address_id: Uuid,
}

pub const BELOW_REGISTERED: &str =
    "Maximum number of students cannot be lower than the number of registered students";

/// `addresses` are those of the consultation's tutor; an address owned by
/// someone else is treated as missing. `registered` is the number of
/// students already signed up, zero for a new consultation.
pub fn check_schedule(
    form: &ConsultationForm,
    subjects: &[SubjectData],
    addresses: &[AddressData],
    registered: usize,
    now: DateTime<Utc>,
) -> Result<Schedule, ValidationErrors> {
    let mut errors = match form.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };

    if form.max_students >= 1 && (form.max_students as usize) < registered {
        errors.add("max_students", field_error("registered", BELOW_REGISTERED));
    }

    let subject_id = form
        .subject_id
        .filter(|id| subjects.iter().any(|s| s.id == *id));
    if subject_id.is_none() {
        errors.add("subject_id", field_error("subject", "Please provide a subject"));
    }

    let address_id = form
        .address_id
        .filter(|id| addresses.iter().any(|a| a.id == *id));
    if address_id.is_none() {
        errors.add("address_id", field_error("address", "Please provide an address"));
    }

    match form.date_time {
        None => errors.add(
            "date_time",
            field_error("date_time", "Please provide date and time"),
        ),
        Some(date_time) if date_time <= now => errors.add(
            "date_time",
            field_error("future", "Please provide future date and time"),
        ),
        Some(_) => {}
    }

    match (subject_id, address_id, form.date_time) {
        (Some(subject_id), Some(address_id), Some(date_time)) if errors.errors().is_empty() => {
            Ok(Schedule {
                description: form.description.clone(),
                max_students: form.max_students,
                date_time,
                subject_id,
                address_id,
            })
        }
        _ => Err(errors),
    }
}

/// Splits consultations into (future, past) against `now`.
pub fn partition(
    consultations: Vec<ConsultationData>,
    now: DateTime<Utc>,
) -> (Vec<ConsultationData>, Vec<ConsultationData>) {
    consultations
        .into_iter()
        .partition(|c| c.temporal(now) == Temporal::Future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, RoleSet};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn user(roles: &[Role]) -> UserData {
        UserData {
            id: Uuid::new_v4(),
            name: "Grace".into(),
            surname: "Hopper".into(),
            email: format!("{}@portal.io", Uuid::new_v4()),
            password_hash: String::new(),
            active: true,
            created_at: now(),
            roles: roles.iter().copied().collect::<RoleSet>(),
        }
    }

    fn consultation(tutor: Uuid, max_students: i32, offset: Duration) -> ConsultationData {
        ConsultationData {
            id: Uuid::new_v4(),
            description: "Linear algebra revision before the exam".into(),
            max_students,
            date_time: now() + offset,
            subject_id: Uuid::new_v4(),
            subject_name: "Mathematics".into(),
            tutor_id: tutor,
            tutor_name: "Grace".into(),
            tutor_surname: "Hopper".into(),
            address_id: Uuid::new_v4(),
            country: "Poland".into(),
            city: "Lodz".into(),
            street: "Piotrkowska".into(),
            street_number: "12".into(),
            students: Vec::new(),
        }
    }

    #[test]
    fn capacity_fills_in_order() {
        let tutor = Uuid::new_v4();
        let mut c = consultation(tutor, 2, Duration::days(1));
        let (a, b, extra) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(admit(&c, a, now()), Ok(()));
        c.students.push(a);
        assert_eq!(c.capacity(), Capacity::Open);
        assert_eq!(admit(&c, b, now()), Ok(()));
        c.students.push(b);
        assert_eq!(c.capacity(), Capacity::Full);

        let refusal = admit(&c, extra, now()).unwrap_err();
        assert_eq!(refusal, Refusal::CapacityExceeded);
        assert_eq!(
            refusal.message(),
            "Cannot register, maximum number of students will be exceeded"
        );
        assert_eq!(c.students, vec![a, b]);
    }

    #[test]
    fn tutor_cannot_join_own_consultation() {
        let tutor = Uuid::new_v4();
        let c = consultation(tutor, 5, Duration::hours(3));
        assert_eq!(admit(&c, tutor, now()), Err(Refusal::OwnConsultation));
    }

    #[test]
    fn registration_refusals() {
        let student = Uuid::new_v4();
        let mut c = consultation(Uuid::new_v4(), 3, Duration::hours(2));
        c.students.push(student);
        assert_eq!(admit(&c, student, now()), Err(Refusal::AlreadyRegistered));

        let mut past = consultation(Uuid::new_v4(), 1, -Duration::hours(2));
        past.students.push(Uuid::new_v4());
        // full as well, but past wins
        assert_eq!(admit(&past, student, now()), Err(Refusal::PastRegister));
    }

    #[test]
    fn unregister_rules() {
        let student = Uuid::new_v4();
        let mut c = consultation(Uuid::new_v4(), 3, Duration::hours(2));
        assert_eq!(release(&c, student, now()), Err(Refusal::NotRegistered));
        c.students.push(student);
        assert_eq!(release(&c, student, now()), Ok(()));

        let mut past = consultation(Uuid::new_v4(), 3, -Duration::minutes(1));
        past.students.push(student);
        assert_eq!(release(&past, student, now()), Err(Refusal::PastUnregister));
    }

    #[test]
    fn consultation_at_now_is_past() {
        let c = consultation(Uuid::new_v4(), 1, Duration::zero());
        assert_eq!(c.temporal(now()), Temporal::Past);
    }

    #[test]
    fn only_owner_or_admin_may_change() {
        let owner = user(&[Role::Student, Role::Tutor]);
        let admin = user(&[Role::Student, Role::Admin]);
        let other = user(&[Role::Student, Role::Tutor]);
        let c = consultation(owner.id, 2, Duration::days(2));

        assert!(authorize(&c, &owner).is_ok());
        assert!(authorize(&c, &admin).is_ok());
        assert!(matches!(authorize(&c, &other), Err(Error::Forbidden { .. })));
    }

    #[test]
    fn past_consultations_are_frozen_except_admin_delete() {
        let owner = user(&[Role::Tutor]);
        let admin = user(&[Role::Admin]);
        let past = consultation(owner.id, 2, -Duration::days(1));
        let future = consultation(owner.id, 2, Duration::days(1));

        assert_eq!(frozen(&past, Mutation::Update, &owner, now()), Some(PAST_UPDATE_WARNING));
        assert_eq!(frozen(&past, Mutation::Update, &admin, now()), Some(PAST_UPDATE_WARNING));
        assert_eq!(frozen(&past, Mutation::Delete, &owner, now()), Some(PAST_DELETE_WARNING));
        assert_eq!(frozen(&past, Mutation::Delete, &admin, now()), None);
        assert_eq!(frozen(&future, Mutation::Update, &owner, now()), None);
        assert_eq!(frozen(&future, Mutation::Delete, &owner, now()), None);
    }

    fn fixtures(tutor: Uuid) -> (Vec<SubjectData>, Vec<AddressData>) {
        let subjects = vec![SubjectData {
            id: Uuid::new_v4(),
            name: "Physics".into(),
        }];
        let addresses = vec![AddressData {
            id: Uuid::new_v4(),
            country: "Poland".into(),
            city: "Krakow".into(),
            street: "Florianska".into(),
            street_number: "3".into(),
            user_id: tutor,
        }];
        (subjects, addresses)
    }

    fn form(subject: Uuid, address: Uuid, date_time: Option<DateTime<Utc>>) -> ConsultationForm {
        ConsultationForm {
            id: None,
            description: "Kinematics problems, bring a calculator".into(),
            max_students: 4,
            date_time,
            subject_id: Some(subject),
            address_id: Some(address),
        }
    }

    fn messages(errors: &ValidationErrors, field: &str) -> Vec<String> {
        errors
            .field_errors()
            .get(field)
            .map(|errs| {
                errs.iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn schedule_accepts_future_date() {
        let (subjects, addresses) = fixtures(Uuid::new_v4());
        let at = now() + Duration::days(1);
        let schedule =
            check_schedule(&form(subjects[0].id, addresses[0].id, Some(at)), &subjects, &addresses, 0, now())
                .unwrap();
        assert_eq!(schedule.date_time, at);
        assert_eq!(schedule.subject_id, subjects[0].id);
        assert_eq!(schedule.max_students, 4);
    }

    #[test]
    fn schedule_rejects_yesterday() {
        let (subjects, addresses) = fixtures(Uuid::new_v4());
        let yesterday = now() - Duration::days(1);
        let errors = check_schedule(
            &form(subjects[0].id, addresses[0].id, Some(yesterday)),
            &subjects,
            &addresses,
            0,
            now(),
        )
        .unwrap_err();
        assert_eq!(messages(&errors, "date_time"), vec!["Please provide future date and time"]);
    }

    #[test]
    fn schedule_reports_every_missing_field() {
        let (subjects, _) = fixtures(Uuid::new_v4());
        let foreign_address = Uuid::new_v4();
        let mut bad = form(Uuid::new_v4(), foreign_address, None);
        bad.description = "too short".into();
        bad.max_students = 0;

        let errors = check_schedule(&bad, &subjects, &[], 0, now()).unwrap_err();
        assert_eq!(messages(&errors, "subject_id"), vec!["Please provide a subject"]);
        assert_eq!(messages(&errors, "address_id"), vec!["Please provide an address"]);
        assert_eq!(messages(&errors, "date_time"), vec!["Please provide date and time"]);
        assert_eq!(
            messages(&errors, "description"),
            vec!["Description must have at least 20 characters"]
        );
        assert_eq!(
            messages(&errors, "max_students"),
            vec!["Maximum number of students must be at least 1"]
        );
    }

    #[test]
    fn schedule_keeps_room_for_registered_students() {
        let (subjects, addresses) = fixtures(Uuid::new_v4());
        let at = Some(now() + Duration::days(3));
        let mut shrink = form(subjects[0].id, addresses[0].id, at);
        shrink.max_students = 1;

        let errors = check_schedule(&shrink, &subjects, &addresses, 3, now()).unwrap_err();
        assert_eq!(messages(&errors, "max_students"), vec![BELOW_REGISTERED]);

        shrink.max_students = 3;
        let schedule = check_schedule(&shrink, &subjects, &addresses, 3, now()).unwrap();
        assert!(3 <= schedule.max_students as usize);
    }

    #[test]
    fn update_checks_run_in_order() {
        let owner = user(&[Role::Tutor]);
        let stranger = user(&[Role::Tutor]);
        let past = consultation(owner.id, 2, -Duration::days(1));
        let future = consultation(owner.id, 2, Duration::days(1));

        // a stranger with a wrong id is refused for ownership first
        assert!(matches!(
            review_update(&future, Some(Uuid::new_v4()), &stranger, now()),
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            review_update(&future, None, &owner, now()),
            Err(Error::Conflict { .. })
        ));
        // a mismatched id on a past consultation is a conflict, not a warning
        assert!(matches!(
            review_update(&past, Some(future.id), &owner, now()),
            Err(Error::Conflict { .. })
        ));
        assert_eq!(
            review_update(&past, Some(past.id), &owner, now()).unwrap(),
            Some(PAST_UPDATE_WARNING)
        );
        assert_eq!(review_update(&future, Some(future.id), &owner, now()).unwrap(), None);
    }

    #[test]
    fn delete_checks_run_in_order() {
        let owner = user(&[Role::Tutor]);
        let admin = user(&[Role::Admin]);
        let stranger = user(&[Role::Tutor]);
        let past = consultation(owner.id, 2, -Duration::days(1));

        assert!(matches!(
            review_delete(&past, &stranger, now()),
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(review_delete(&past, &owner, now()).unwrap(), Some(PAST_DELETE_WARNING));
        assert_eq!(review_delete(&past, &admin, now()).unwrap(), None);
    }

    #[test]
    fn partition_splits_on_now() {
        let tutor = Uuid::new_v4();
        let future = consultation(tutor, 1, Duration::hours(1));
        let past = consultation(tutor, 1, -Duration::hours(1));
        let (f, p) = partition(vec![future.clone(), past.clone()], now());
        assert_eq!(f.iter().map(|c| c.id).collect::<Vec<_>>(), vec![future.id]);
        assert_eq!(p.iter().map(|c| c.id).collect::<Vec<_>>(), vec![past.id]);
    }
}
