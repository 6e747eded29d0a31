pub mod addresses;
pub mod admin;
pub mod auth;
pub mod comments;
pub mod config;
pub mod consultations;
pub mod err;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod subjects;
pub mod tutors;
pub mod users;
pub mod view;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{AdminSeed, Config};
use crate::models::{RegisterUser, Role};

/// Creates the configured administrator account on first start. An account
/// already holding the email is left untouched.
async fn ensure_defaults(pg: &PgPool, seed: &AdminSeed) -> anyhow::Result<()> {
    if users::find_by_email(pg, &seed.email).await?.is_some() {
        return Ok(());
    }
    let admin = users::save_user(
        pg,
        &RegisterUser {
            name: "Admin".to_string(),
            surname: "Admin".to_string(),
            email: seed.email.clone(),
            password: seed.password.clone(),
        },
    )
    .await?;
    users::grant_role(pg, admin.id, Role::Admin).await?;
    log::info!("Created administrator account {}", seed.email);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::load()?;

    let pg = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pg).await?;
    if let Some(seed) = &config.admin {
        ensure_defaults(&pg, seed).await?;
    }

    let addr = config.bind_addr;
    let app = routes::app(pg, Arc::new(config));

    log::info!("Starting tutoring portal on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
