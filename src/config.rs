use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use chrono::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub max_connections: u32,
    pub session_days: i64,
    pub admin: Option<AdminSeed>,
}

/// Credentials of the administrator created on first start.
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let admin = match (lookup("ADMIN_EMAIL"), lookup("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed { email, password }),
            (Some(_), None) | (None, Some(_)) => {
                log::warn!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together, ignoring");
                None
            }
            (None, None) => None,
        };

        let config = Self {
            bind_addr: try_load(&lookup, "BIND_ADDR", "127.0.0.1:3000")?,
            database_url: try_load(&lookup, "DATABASE_URL", "postgres://localhost/tutoring")?,
            max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            session_days: try_load(&lookup, "SESSION_DAYS", "2")?,
            admin,
        };
        if config.session_days < 1 {
            anyhow::bail!("SESSION_DAYS must be at least 1, got {}", config.session_days);
        }
        Ok(config)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::days(self.session_days)
    }
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_string()
    });
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid {} value `{}`", key, raw))
}
