//! Server configuration from the environment

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DATABASE_URL: &str = "sqlite://commerce.db";
const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_CURRENCY: &str = "MXN";

/// Process-wide settings, built once at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Base for provider return and notification URLs
    pub public_site_url: String,
    /// Bearer tokens are ignored when unset
    pub jwt_secret: Option<String>,
    /// Let stock go negative instead of failing the settlement
    pub allow_oversell: bool,
    pub seed_demo_catalog: bool,
    /// ISO 4217 code charged by every provider
    pub currency: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            public_site_url: DEFAULT_SITE_URL.into(),
            jwt_secret: None,
            allow_oversell: true,
            seed_demo_catalog: false,
            currency: DEFAULT_CURRENCY.into(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            public_site_url: var("PUBLIC_SITE_URL").unwrap_or(defaults.public_site_url),
            jwt_secret: var("JWT_SECRET"),
            allow_oversell: flag("ALLOW_OVERSELL").unwrap_or(defaults.allow_oversell),
            seed_demo_catalog: flag("SEED_DEMO_CATALOG").unwrap_or(defaults.seed_demo_catalog),
            currency: var("CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or(defaults.currency),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(name: &str) -> Option<bool> {
    let value = var(name)?;
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(name, value = %value, "Ignoring unrecognised boolean");
            None
        }
    }
}
