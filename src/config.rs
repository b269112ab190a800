use std::env;

pub const LOCAL_JWT_SECRET: &str = "multilink-local-development-secret";
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
/// One year. Keeps `now + ttl` far from chrono's representable range.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 366;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at start-up
/// and shared read-only through the application state via FromRef.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Postgres connection string. `None` in local mode selects the in-memory store.
    pub db_url: Option<String>,
    // Runtime environment marker. Controls log format and which secrets are mandatory.
    pub env: Env,
    // Symmetric secret used to sign and validate session tokens.
    pub jwt_secret: String,
    // Lifetime of an issued token.
    pub token_ttl_hours: i64,
    // Address the HTTP server listens on.
    pub bind_addr: String,
    // Address of the Prometheus scrape endpoint; no exporter when unset.
    pub metrics_addr: Option<String>,
}

/// Env
///
/// Defines the runtime context: relaxed defaults for local development, fail-fast
/// mandatory secrets in production.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// default
    ///
    /// A non-panicking configuration for test state scaffolding: local mode, the
    /// in-memory store, and the local signing secret.
    fn default() -> Self {
        Self {
            db_url: None,
            env: Env::Local,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            metrics_addr: None,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from the environment (after `dotenv`) and applies the
    /// **fail-fast** principle.
    ///
    /// # Panics
    /// Panics in production when `DATABASE_URL` or `JWT_SECRET` is missing, and in
    /// any environment when `TOKEN_TTL_HOURS` is not an integer in
    /// `1..=MAX_TOKEN_TTL_HOURS`.
    pub fn load() -> Self {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let (db_url, jwt_secret) = match env {
            Env::Production => (
                Some(env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod")),
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production."),
            ),
            Env::Local => (
                env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let token_ttl_hours = match env::var("TOKEN_TTL_HOURS") {
            Ok(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|hours| (1..=MAX_TOKEN_TTL_HOURS).contains(hours))
                .expect("FATAL: TOKEN_TTL_HOURS must be between 1 and 8784"),
            Err(_) => DEFAULT_TOKEN_TTL_HOURS,
        };

        Self {
            db_url,
            env,
            jwt_secret,
            token_ttl_hours,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            metrics_addr: env::var("METRICS_ADDR").ok().filter(|addr| !addr.is_empty()),
        }
    }
}
