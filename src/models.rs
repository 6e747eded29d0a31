use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueRef};
use sqlx::{Decode, Postgres};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Tutor => "TUTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STUDENT" => Ok(Role::Student),
            "TUTOR" => Ok(Role::Tutor),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("Unknown role `{}`", other)),
        }
    }
}

/// Roles held by one account. Decoded straight from a `TEXT[]` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn has(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has(Role::Admin)
    }

    pub fn is_tutor(&self) -> bool {
        self.has(Role::Tutor)
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        RoleSet(iter.into_iter().collect())
    }
}

impl sqlx::Type<Postgres> for RoleSet {
    fn type_info() -> PgTypeInfo {
        <Vec<String> as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Vec<String> as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for RoleSet {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let names = <Vec<String> as Decode<Postgres>>::decode(value)?;
        let roles = names
            .iter()
            .map(|name| name.parse::<Role>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(RoleSet(roles))
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserData {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub roles: RoleSet,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserSession {
    pub ssid: String,
    pub belongs_to: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SubjectData {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AddressData {
    pub id: Uuid,
    pub country: String,
    pub city: String,
    pub street: String,
    pub street_number: String,
    pub user_id: Uuid,
}

/// A consultation together with the names a listing shows and the ids of
/// the students registered to it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConsultationData {
    pub id: Uuid,
    pub description: String,
    pub max_students: i32,
    pub date_time: DateTime<Utc>,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub tutor_surname: String,
    pub address_id: Uuid,
    pub country: String,
    pub city: String,
    pub street: String,
    pub street_number: String,
    /// Listings are public, so only the head count leaves the server.
    #[serde(rename = "registered_students", serialize_with = "head_count")]
    pub students: Vec<Uuid>,
}

fn head_count<S: Serializer>(students: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(students.len() as u64)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentData {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub feedback: String,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub tutor_surname: String,
    pub student_id: Uuid,
    pub student_name: String,
    pub student_surname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterUser {
    #[validate(length(min = 1, message = "Please provide a name"))]
    pub name: String,
    #[validate(length(min = 1, message = "Please provide a surname"))]
    pub surname: String,
    #[validate(email(message = "Please provide a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must have at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProfileForm {
    #[validate(length(min = 1, message = "Please provide a name"))]
    pub name: String,
    #[validate(length(min = 1, message = "Please provide a surname"))]
    pub surname: String,
    #[validate(email(message = "Please provide a valid email"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordForm {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPasswordForm {
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubjectForm {
    #[validate(length(min = 1, message = "Please provide a subject name"))]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubjectSelection {
    #[serde(default)]
    pub subject_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddressForm {
    #[validate(length(min = 1, message = "Please provide a country"))]
    pub country: String,
    #[validate(length(min = 1, message = "Please provide a city"))]
    pub city: String,
    #[validate(length(min = 1, message = "Please provide a street"))]
    pub street: String,
    #[validate(length(min = 1, message = "Please provide a street number"))]
    pub street_number: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentForm {
    #[validate(length(min = 10, message = "Feedback must have at least 10 characters"))]
    pub feedback: String,
}

/// Submitted consultation form. The registered students are never part of
/// it; an update keeps whatever set is stored.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConsultationForm {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 20, message = "Description must have at least 20 characters"))]
    pub description: String,
    #[validate(range(min = 1, message = "Maximum number of students must be at least 1"))]
    pub max_students: i32,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject_id: Option<Uuid>,
    #[serde(default)]
    pub address_id: Option<Uuid>,
}
