use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    /// HS256 secret for bearer-token verification. Optional so the
    /// unauthenticated deployment can run without one; a request that
    /// presents a token anyway is then a server misconfiguration.
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: u64,
}

pub fn load() -> Result<AppConfig> {
    let url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    let ttl_secs = env_parsed("CACHE_TTL_SECS", 900u64)?;
    let capacity = env_parsed("CACHE_CAPACITY", 10_000u64)?;

    Ok(AppConfig {
        database: DatabaseConfig { url },
        server: ServerConfig { bind_addr },
        cache: CacheConfig {
            ttl: Duration::from_secs(ttl_secs),
            capacity,
        },
        jwt_secret: env::var("JWT_SECRET").ok(),
    })
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
