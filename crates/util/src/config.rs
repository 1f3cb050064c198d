use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{database_url, server_bind_address};

const DEV_SESSION_SECRET: &str = "uni-apply-development-session-secret";
const MIN_SESSION_SECRET_LEN: usize = 32;
const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;
const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;
const DEFAULT_ADMIN_EMAIL: &str = "admin@system.com";
const DEFAULT_ADMIN_PASSWORD: &str = "Admin@123";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Credentials of the administrator account created at startup when missing.
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

impl AdminSeed {
    /// Returns `true` when the password is the built-in default.
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_ADMIN_PASSWORD
    }
}

impl fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub session_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub password_iterations: u32,
    pub admin: AdminSeed,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let session_secret = session_secret(environment)?;
        let session_ttl = Duration::from_secs(parse_number(
            "APP_SESSION_TTL_SECS",
            DEFAULT_SESSION_TTL_SECS,
        )?);
        let password_iterations =
            parse_number("APP_PASSWORD_ITERATIONS", DEFAULT_PASSWORD_ITERATIONS)?;

        let admin = AdminSeed {
            email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| DEFAULT_ADMIN_EMAIL.to_string()),
            password: env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_ADMIN_PASSWORD.to_string()),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            session_secret,
            session_ttl,
            password_iterations,
            admin,
        })
    }
}

fn session_secret(environment: Environment) -> Result<Vec<u8>, ConfigError> {
    match env::var("APP_SESSION_SECRET") {
        Ok(value) if value.len() >= MIN_SESSION_SECRET_LEN => Ok(value.into_bytes()),
        Ok(_) => Err(ConfigError::WeakSessionSecret),
        Err(_) if environment == Environment::Production => {
            Err(ConfigError::MissingVar("APP_SESSION_SECRET"))
        }
        Err(_) => Ok(DEV_SESSION_SECRET.as_bytes().to_vec()),
    }
}

fn parse_number<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::from(0u8) => Ok(value),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    WeakSessionSecret,
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set"),
            Self::WeakSessionSecret => write!(
                f,
                "APP_SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes long"
            ),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
