use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEFAULT_EMAIL_FUNCTION_URL: &str =
    "https://jtzbuxoslaotpnwsphqv.supabase.co/functions/v1/resend-email";
const DEFAULT_PUBLIC_BASE_URL: &str = "https://contratandoplanos.com.br";
const DEFAULT_EMAIL_TIMEOUT_SECS: u64 = 20;
const DEFAULT_ADMIN_PAGE_SIZE: usize = 25;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub email: EmailConfig,
    pub intake: IntakeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let email = EmailConfig::from_env(environment)?;

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string());
        let admin_page_size = match env::var("ADMIN_PAGE_SIZE") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ConfigError::InvalidPageSize)?,
            Err(_) => DEFAULT_ADMIN_PAGE_SIZE,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            email,
            intake: IntakeConfig {
                public_base_url,
                admin_page_size,
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Hosted email function settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub function_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Log messages instead of calling the function (local development).
    pub simulate: bool,
}

impl EmailConfig {
    fn from_env(environment: AppEnvironment) -> Result<Self, ConfigError> {
        let function_url = env::var("EMAIL_FUNCTION_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EMAIL_FUNCTION_URL.to_string());
        let api_key = env::var("EMAIL_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let timeout_secs = match env::var("EMAIL_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout)?,
            Err(_) => DEFAULT_EMAIL_TIMEOUT_SECS,
        };
        let simulate = match env::var("EMAIL_SIMULATE") {
            Ok(raw) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            Err(_) => environment == AppEnvironment::Development,
        };

        if !simulate && api_key.is_none() && environment == AppEnvironment::Production {
            return Err(ConfigError::MissingEmailCredential);
        }

        Ok(Self {
            function_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
            simulate,
        })
    }
}

/// Knobs for the intake wizard and the back-office listing.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub public_base_url: String,
    pub admin_page_size: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            admin_page_size: DEFAULT_ADMIN_PAGE_SIZE,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTimeout,
    InvalidPageSize,
    MissingEmailCredential,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTimeout => {
                write!(f, "EMAIL_TIMEOUT_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidPageSize => {
                write!(f, "ADMIN_PAGE_SIZE must be a positive integer")
            }
            ConfigError::MissingEmailCredential => {
                write!(f, "EMAIL_API_KEY is required when emails are not simulated in production")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidTimeout
            | ConfigError::InvalidPageSize
            | ConfigError::MissingEmailCredential => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "EMAIL_FUNCTION_URL",
            "EMAIL_API_KEY",
            "EMAIL_TIMEOUT_SECS",
            "EMAIL_SIMULATE",
            "PUBLIC_BASE_URL",
            "ADMIN_PAGE_SIZE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.email.timeout, Duration::from_secs(20));
        assert!(config.email.simulate, "development simulates email");
        assert_eq!(config.intake.admin_page_size, 25);
        assert_eq!(config.intake.public_base_url, DEFAULT_PUBLIC_BASE_URL);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn production_requires_email_credential() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::MissingEmailCredential)
        ));

        env::set_var("EMAIL_API_KEY", "secret");
        let config = AppConfig::load().expect("config loads with key");
        assert!(!config.email.simulate);
        assert_eq!(config.email.api_key.as_deref(), Some("secret"));
        reset_env();
    }

    #[test]
    fn rejects_zero_page_size_and_timeout() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ADMIN_PAGE_SIZE", "0");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidPageSize)));

        reset_env();
        env::set_var("EMAIL_TIMEOUT_SECS", "soon");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidTimeout)));
        reset_env();
    }

    #[test]
    fn trims_trailing_slash_from_public_base_url() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PUBLIC_BASE_URL", "https://propostas.example.com/");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.intake.public_base_url, "https://propostas.example.com");
        reset_env();
    }
}
