use axum::Json;
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::err::{Error, Success};

pub type Payload<T> = axum::response::Result<Json<Success<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Success::of(value)))
}

/// What a template would be handed: the view name, flash messages and the
/// model attributes flattened next to them.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct View<M> {
    pub view: &'static str,
    pub success_message: Option<String>,
    pub warning_message: Option<String>,
    #[serde(flatten)]
    pub model: M,
}

impl<M: Serialize> View<M> {
    pub fn new(view: &'static str, model: M) -> Self {
        Self {
            view,
            success_message: None,
            warning_message: None,
            model,
        }
    }

    pub fn success<S: Into<String>>(mut self, message: S) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn warning<S: Into<String>>(mut self, message: S) -> Self {
        self.warning_message = Some(message.into());
        self
    }

    pub fn render(self) -> Payload<Self> {
        proceeds(self)
    }
}

/// Model for views that carry nothing but the view name.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Empty {}

pub fn bare(view: &'static str) -> Payload<View<Empty>> {
    View::new(view, Empty {}).render()
}
