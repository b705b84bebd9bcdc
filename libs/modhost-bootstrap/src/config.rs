use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::env::prefixed_vars;

/// Main process configuration. Every section can be overridden from the
/// environment using the variable names the host has always read
/// (`APP_*` for the server, `DB_*` for the database).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Listener and deployment settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Relational store holding module configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration (optional, uses defaults if None).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the trusted listener serving `/actions` and `/events`.
    pub internal_port: u16,
    /// Port of the public listener serving module routes.
    pub external_port: u16,
    pub production: bool,
    /// Signing key handed to modules that issue tokens.
    pub jwt_key: String,
    /// Public host used by `rest_base_url`; empty means localhost.
    pub rest_host: String,
    pub tls_enabled: bool,
    /// Base directory for relative log file paths.
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Full DSN; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub max_conns: u32,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/modhost.log"
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            internal_port: 3000,
            external_port: 8000,
            production: false,
            jwt_key: String::new(),
            rest_host: String::new(),
            tls_enabled: false,
            logs_dir: ".".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            url: None,
            max_conns: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: Some(default_logging_config()),
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/modhost.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl ServerConfig {
    /// Address the internal listener binds to.
    ///
    /// The internal listener accepts unverified sessions, so outside of
    /// production it only listens on loopback.
    pub fn internal_bind_addr(&self) -> std::net::SocketAddr {
        let ip = if self.production {
            std::net::Ipv4Addr::UNSPECIFIED
        } else {
            std::net::Ipv4Addr::LOCALHOST
        };
        std::net::SocketAddr::from((ip, self.internal_port))
    }

    pub fn external_bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, self.external_port))
    }
}

impl DatabaseConfig {
    /// Connection string for the configured database.
    pub fn dsn(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        let auth = match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(pwd) => format!("{}:{}", self.user, pwd),
            None => self.user.clone(),
        };
        format!(
            "postgres://{}@{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Format, Serialized, Yaml},
            Figment,
        };

        let file_cfg: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig {
                logging: None,
                ..AppConfig::default()
            }))
            .merge(Yaml::file(config_path.as_ref()))
            .extract()
            .with_context(|| {
                format!(
                    "Failed to extract config from {}",
                    config_path.as_ref().display()
                )
            })?;

        file_cfg.with_env_overrides()
    }

    /// Load configuration from file or use default values; environment overrides apply either way.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Self::default().with_env_overrides(),
        }
    }

    /// Overlay `APP_*` onto `server` and `DB_*` onto `database`.
    fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(prefixed_vars("APP_", &[]), prefixed_vars("DB_", &[]))
    }

    /// Apply raw `name -> text` overrides (prefix already stripped).
    ///
    /// String fields take the text verbatim; numeric and boolean fields are
    /// parsed from it.
    fn with_overrides(
        self,
        mut app: BTreeMap<String, String>,
        db: BTreeMap<String, String>,
    ) -> Result<Self> {
        use figment::{providers::Serialized, Figment};

        // APP_PRODUCTION is matched case-insensitively, like every other flag reader.
        let production = app
            .remove("production")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let mut server: ServerConfig = Figment::from(Serialized::defaults(&self.server))
            .merge(Serialized::defaults(app))
            .extract_lossy()
            .context("Failed to apply APP_* environment overrides")?;
        server.production = server.production || production;

        let database: DatabaseConfig = Figment::from(Serialized::defaults(&self.database))
            .merge(Serialized::defaults(db))
            .extract_lossy()
            .context("Failed to apply DB_* environment overrides")?;

        Ok(Self {
            server,
            database,
            logging: self.logging,
        })
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.internal_port {
            self.server.internal_port = port;
        }
        if let Some(port) = args.external_port {
            self.server.external_port = port;
        }
        if args.mock {
            self.database.url = Some("sqlite::memory:".to_string());
            // every pooled connection would otherwise open its own empty database
            self.database.max_conns = 1;
        }

        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(), // keep
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub internal_port: Option<u16>,
    pub external_port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
    pub mock: bool,
}

/// Public base URL of the external listener, e.g. for links sent to users.
pub fn rest_base_url(server: &ServerConfig) -> String {
    let mut base = server.rest_host.trim().to_ascii_lowercase();
    if base.is_empty() {
        base = "localhost".to_string();
        if server.external_port != 80 {
            base = format!("{base}:{}", server.external_port);
        }
    }
    let scheme = if server.tls_enabled { "https" } else { "http" };
    format!("{scheme}://{base}")
}
