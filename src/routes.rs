use std::sync::Arc;

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Router};
use sqlx::PgPool;
use tower::ServiceBuilder;

use crate::config::Config;
use crate::{addresses, admin, auth, comments, consultations, err, subjects, tutors, users};

/// Builds the portal's router. Handlers pull the pool and the configuration
/// out of request extensions.
pub fn app(pg: PgPool, config: Arc<Config>) -> Router {
    Router::new()
        .route("/", get(users::home))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/registration", get(auth::registration_page).post(auth::register_user))
        .route("/profile/update", get(users::profile_page).post(users::update_own_profile))
        .route("/update-password", get(users::password_page).post(users::update_own_password))
        .route("/profile/delete", get(users::delete_profile))
        .merge(consultation_routes())
        .merge(directory_routes())
        .merge(address_routes())
        .merge(admin_routes())
        .fallback(err::handler404.into_service())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(pg))
                .layer(Extension(config)),
        )
}

fn consultation_routes() -> Router {
    Router::new()
        .route("/consultations/past", get(consultations::past_consultations))
        .route("/consultations/future", get(consultations::future_consultations))
        .route("/consultations/my-consultations", get(consultations::my_consultations))
        .route(
            "/consultations/add",
            get(consultations::add_consultation_page).post(consultations::add_consultation),
        )
        .route(
            "/consultations/update/:id",
            get(consultations::update_consultation_page).post(consultations::update_consultation),
        )
        .route("/consultations/delete/:id", get(consultations::delete_consultation))
        .route("/consultations/register/:id", get(consultations::register_to))
        .route("/consultations/unregister/:id", get(consultations::unregister_from))
        .route("/consultations/:id", get(consultations::show_consultation))
}

fn directory_routes() -> Router {
    Router::new()
        .route("/subjects", get(subjects::list_subjects))
        .route("/subjects/:id/tutors", get(subjects::subject_tutors))
        .route("/subjects/:id/consultations", get(subjects::subject_consultations))
        .route("/my-subjects", get(subjects::my_subjects_page).post(subjects::update_my_subjects))
        .route("/tutors", get(tutors::list_tutors))
        .route("/tutors/:id/consultations", get(tutors::tutor_consultations))
        .route("/tutors/:id/comments", get(comments::tutor_comments))
        .route("/tutors/:id/comments/add", post(comments::add_comment))
        .route("/my-comments", get(comments::my_comments))
        .route(
            "/my-comments/update/:id",
            get(comments::update_comment_page).post(comments::update_comment),
        )
        .route("/my-comments/delete/:id", get(comments::delete_comment))
}

fn address_routes() -> Router {
    Router::new()
        .route("/addresses", get(addresses::list_addresses))
        .route("/addresses/add", get(addresses::add_address_page).post(addresses::add_address))
        .route(
            "/addresses/update/:id",
            get(addresses::update_address_page).post(addresses::update_address),
        )
        .route("/addresses/delete/:id", get(addresses::delete_address))
}

fn admin_routes() -> Router {
    Router::new()
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/register", get(admin::register_user_page).post(admin::register_user))
        .route("/admin/users/update/:id", get(admin::update_user_page).post(admin::update_user))
        .route(
            "/admin/users/update-password/:id",
            get(admin::update_password_page).post(admin::update_password),
        )
        .route("/admin/users/delete/:id", get(admin::delete_user))
        .route("/admin/users/role/:action/:role/:id", get(admin::change_role))
        .route("/admin/users/block/:id", get(admin::block_user))
        .route("/admin/users/unblock/:id", get(admin::unblock_user))
        .route("/admin/subjects", get(admin::list_subjects))
        .route("/admin/subjects/add", get(admin::add_subject_page).post(admin::add_subject))
        .route(
            "/admin/subjects/update/:id",
            get(admin::update_subject_page).post(admin::update_subject),
        )
        .route("/admin/subjects/delete/:id", get(admin::delete_subject))
        .route("/admin/comments/delete/:id", get(admin::delete_comment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, HttpBody};
    use axum::http::{header, Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// The pool never connects unless a handler actually queries.
    fn router() -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        let pg = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        app(pg, Arc::new(config))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let mut body = response.into_body();
        let bytes = body.data().await.unwrap().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get(uri: &str) -> axum::response::Response {
        router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_path_renders_404_view() {
        let response = get("/no/such/page").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["view"], err::ERROR_404_VIEW);
        assert_eq!(json["error"], "NotFound");
    }

    #[tokio::test]
    async fn anonymous_home_has_no_user() {
        let response = get("/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["view"], "index");
        assert_eq!(json["user"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn login_page_is_public() {
        let json = body_json(get("/login").await).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["view"], "login");
    }

    #[tokio::test]
    async fn protected_pages_require_a_session() {
        for uri in [
            "/consultations/past",
            "/my-comments",
            "/addresses",
            "/admin/users",
            "/consultations/register/7b7ef4a6-7f3c-4a44-9a43-3e3a3b0b2a11",
            "/subjects/7b7ef4a6-7f3c-4a44-9a43-3e3a3b0b2a11/consultations",
            "/subjects/7b7ef4a6-7f3c-4a44-9a43-3e3a3b0b2a11/tutors",
            "/tutors/7b7ef4a6-7f3c-4a44-9a43-3e3a3b0b2a11/consultations",
            "/tutors/7b7ef4a6-7f3c-4a44-9a43-3e3a3b0b2a11/comments",
        ] {
            let response = get(uri).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            let json = body_json(response).await;
            assert_eq!(json["view"], "login");
        }
    }

    #[tokio::test]
    async fn empty_session_cookie_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/profile/update")
                    .header(header::COOKIE, "ssid=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_without_password_is_refused() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":"ada@portal.io","password":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["view"], "login");
        assert_eq!(json["message"], "Invalid email or password");
    }
}
