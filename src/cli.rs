//! CLI argument parsing, validation, and startup helpers.

use std::path::PathBuf;

use crate::ServerConfig;
use crate::db::{ADMIN_ROLE, Database};
use crate::jwt::JwtSettings;
use crate::logging::{LogFormat, LogSettings};
use crate::rate_limit::RateLimitConfig;
use clap::Parser;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(Parser, Debug, Clone)]
#[command(name = "cadastro", about = "Personnel registration API with JWT authentication")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "cadastro.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in minutes (fractions allowed, default 10)
    #[arg(long, env = "JWT_TOKEN_VALIDITY_IN_MINUTES")]
    pub token_validity_minutes: Option<String>,

    /// Refresh token lifetime in whole minutes (default 60)
    #[arg(long, env = "JWT_REFRESH_TOKEN_VALIDITY_IN_MINUTES")]
    pub refresh_token_validity_minutes: Option<String>,

    /// Audience written into and required from access tokens
    #[arg(long, env = "JWT_VALID_AUDIENCE")]
    pub valid_audience: Option<String>,

    /// Issuer written into and required from access tokens
    #[arg(long, env = "JWT_VALID_ISSUER")]
    pub valid_issuer: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Log filter directive, e.g. "info" or "cadastro=debug,sqlx=warn"
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Do not persist log events into the api_logs table
    #[arg(long)]
    pub no_db_log: bool,

    /// Disable new user signups
    #[arg(long)]
    pub no_signup: bool,

    /// Add the user with this email to the Admin role on startup
    #[arg(long, value_name = "EMAIL")]
    pub grant_admin: Option<String>,
}

impl Args {
    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            format: self.log_format.clone(),
            level: self.log_level.clone(),
            file: self.log_file.clone(),
            database: !self.no_db_log,
        }
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: called during startup before any request handling,
        // and no other code reads this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    check_secret_length(secret)
}

fn check_secret_length(secret: String) -> Option<String> {
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Carry the token options into a settings bundle. Raw strings are kept so
/// unparseable lifetimes fall back to the defaults.
pub fn build_jwt_settings(args: &Args, jwt_secret: String) -> JwtSettings {
    let mut settings = JwtSettings::new(jwt_secret);
    if let Some(minutes) = &args.token_validity_minutes {
        settings = settings.with_token_validity(minutes.as_str());
    }
    if let Some(minutes) = &args.refresh_token_validity_minutes {
        settings = settings.with_refresh_token_validity(minutes.as_str());
    }
    if let Some(audience) = &args.valid_audience {
        settings = settings.with_audience(audience.as_str());
    }
    if let Some(issuer) = &args.valid_issuer {
        settings = settings.with_issuer(issuer.as_str());
    }
    settings
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt: build_jwt_settings(args, jwt_secret),
        no_signup: args.no_signup,
        rate_limit: RateLimitConfig::new(),
    }
}

/// Handle the --grant-admin flag. Returns false if the grant failed.
pub async fn handle_grant_admin(db: &Database, email: &str) -> bool {
    let user = match db.users().get_by_email(email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(email = %email, "No user with this email");
            return false;
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            return false;
        }
    };

    let role = match db.roles().get_by_name(ADMIN_ROLE).await {
        Ok(Some(role)) => role,
        Ok(None) => {
            error!("Admin role is missing from the database");
            return false;
        }
        Err(e) => {
            error!(error = %e, "Failed to look up role");
            return false;
        }
    };

    match db.roles().add_user_to_role(user.id, role.id).await {
        Ok(true) => {
            info!(username = %user.username, "Granted Admin role");
            true
        }
        Ok(false) => {
            info!(username = %user.username, "User is already an admin");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to grant Admin role");
            false
        }
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
