use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;
use validator::{ValidationError, ValidationErrors};

pub const ERROR_403_VIEW: &str = "errors/error-403";
pub const ERROR_404_VIEW: &str = "errors/error-404";
pub const ERROR_500_VIEW: &str = "errors/error-500";
pub const ERROR_VIEW: &str = "errors/error";

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

pub fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Field name to the messages rejected for it, in a stable order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    InvalidPayload {
        #[serde(skip)]
        view: &'static str,
        fields: FieldErrors,
    },
    NotFound { message: String },
    Forbidden { message: String },
    Conflict { message: String },
    Unauthenticated { message: String },
    InternalError { kind: &'static str, message: String },
    Unknown { message: String },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    view: &'static str,
    #[serde(flatten)]
    error: &'a Error,
}

impl Error {
    pub fn unknown<S: Into<String>>(msg: S) -> Error {
        Error::Unknown {
            message: msg.into(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Error {
        Error::Forbidden {
            message: msg.into(),
        }
    }

    /// Wraps collected field errors so they render inline on `view`.
    pub fn invalid(view: &'static str, errors: &ValidationErrors) -> Error {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => e.code.to_string(),
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        Error::InvalidPayload { view, fields }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidPayload { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The view a template layer renders for this error.
    pub fn view(&self) -> &'static str {
        match self {
            Error::InvalidPayload { view, .. } => *view,
            Error::NotFound { .. } => ERROR_404_VIEW,
            Error::Forbidden { .. } => ERROR_403_VIEW,
            Error::Unauthenticated { .. } => "login",
            Error::InternalError { .. } => ERROR_500_VIEW,
            Error::Conflict { .. } | Error::Unknown { .. } => ERROR_VIEW,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPayload { view, fields } => {
                write!(f, "invalid input on {}: {:?}", view, fields.keys().collect::<Vec<_>>())
            }
            Error::InternalError { kind, message } => write!(f, "{}: {}", kind, message),
            Error::NotFound { message }
            | Error::Forbidden { message }
            | Error::Conflict { message }
            | Error::Unauthenticated { message }
            | Error::Unknown { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::InternalError { kind, message } = &self {
            log::error!("{}: {}", kind, message);
        }
        let body = ErrorBody {
            success: false,
            view: self.view(),
            error: &self,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::InternalError {
            kind: "DatabaseError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_views_follow_status() {
        assert_eq!(Error::not_found("x").view(), ERROR_404_VIEW);
        assert_eq!(Error::forbidden("x").status(), StatusCode::FORBIDDEN);
        let conflict = Error::Conflict {
            message: "id mismatch".into(),
        };
        assert_eq!(conflict.view(), ERROR_VIEW);
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(Error::unknown("boom").view(), ERROR_VIEW);
        let internal = Error::InternalError {
            kind: "DatabaseError",
            message: "gone".into(),
        };
        assert_eq!(internal.view(), ERROR_500_VIEW);
    }

    #[test]
    fn invalid_collects_messages_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "date_time",
            field_error("future", "Please provide future date and time"),
        );

        match Error::invalid("add-consultation", &errors) {
            Error::InvalidPayload { view, fields } => {
                assert_eq!(view, "add-consultation");
                assert_eq!(
                    fields["date_time"],
                    vec!["Please provide future date and time".to_string()]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn body_is_tagged_with_error_kind() {
        let err = Error::not_found("Consultation does not exist");
        let body = ErrorBody {
            success: false,
            view: err.view(),
            error: &err,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "NotFound");
        assert_eq!(json["view"], ERROR_404_VIEW);
        assert_eq!(json["success"], false);
    }
}
