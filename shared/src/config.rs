use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Runtime configuration, read once at cold start
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub jwt_secret: String,
    pub admin_username: String,
    /// Argon2 PHC string for the administrator password
    pub admin_password_hash: String,
    pub frontend_url: String,
    /// Sender address for password reset mail; mail is skipped when unset
    pub mail_from: Option<String>,
    pub assets_bucket: Option<String>,
    pub assets_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            table_name: env::var("TABLE_NAME").unwrap_or_else(|_| "rental-booking".to_string()),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            admin_username: env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password_hash: env::var("ADMIN_PASSWORD_HASH")
                .map_err(|_| ConfigError::Missing("ADMIN_PASSWORD_HASH"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            mail_from: env::var("MAIL_FROM").ok(),
            assets_bucket: env::var("ASSETS_BUCKET").ok(),
            assets_base_url: env::var("ASSETS_BASE_URL").ok(),
        })
    }
}
