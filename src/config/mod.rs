use std::env;
use std::fmt;
use std::path::PathBuf;

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
}

/// Top-level configuration for the service, loaded once at startup and
/// passed by reference into the engine. No ambient lookups elsewhere.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub sync: SyncConfig,
    pub billing: BillingConfig,
    pub packages: PackageCatalog,
    pub keywords: KeywordConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let sync = SyncConfig {
            property_id: require("FIBER_PROPERTY_ID")?,
            parent_site_id: require("FIBER_SITE_ID")?,
            complex_client_id: require("FIBER_BILLING_CLIENT_ID")?,
            grace_period_day: parse_or("FIBER_GRACE_DAY", 5)?,
            polling_interval_minutes: parse_or("FIBER_POLL_MINUTES", 5)?,
            state_path: path_or("FIBER_STATE_PATH", "fiber-sync-state.json"),
            inventory_path: path_or("FIBER_INVENTORY_PATH", "endpoint-inventory.csv"),
        };

        let billing = BillingConfig {
            base_rate: parse_or("FIBER_BASE_RATE", 45.0)?,
            total_units: parse_or("FIBER_TOTAL_UNITS", 118)?,
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            sync,
            billing,
            packages: PackageCatalog::standard(),
            keywords: KeywordConfig::from_env(),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar { name }),
    }
}

fn path_or(name: &str, default: &str) -> PathBuf {
    env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidVar { name }),
        Err(_) => Ok(default),
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Settings driving the reconciliation cycle.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Property identifier in the property-management system.
    pub property_id: String,
    /// Parent site new endpoints are authorized under.
    pub parent_site_id: String,
    /// Billing client representing the complex (tickets and invoices).
    pub complex_client_id: String,
    /// Day of month before which delinquency is never enforced.
    pub grace_period_day: u32,
    pub polling_interval_minutes: u64,
    /// Where lease/ticket state is persisted between cycles.
    pub state_path: PathBuf,
    /// Endpoint inventory CSV, written back when endpoints change status.
    pub inventory_path: PathBuf,
}

/// Complex-level billing terms.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Per occupied unit, per month.
    pub base_rate: f64,
    pub total_units: u32,
}

/// One service tier offered to units.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePackage {
    pub code: &'static str,
    pub name: &'static str,
    pub down_mbps: u32,
    pub up_mbps: u32,
    /// Monthly add-on over the base rate; zero for the included tier.
    pub addon_price: f64,
    pub default: bool,
}

/// Catalog of offered packages with the default tier marked.
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    packages: Vec<ServicePackage>,
}

impl PackageCatalog {
    pub fn standard() -> Self {
        Self {
            packages: vec![
                ServicePackage {
                    code: "500M",
                    name: "Fiber 500",
                    down_mbps: 500,
                    up_mbps: 500,
                    addon_price: 0.0,
                    default: true,
                },
                ServicePackage {
                    code: "1G",
                    name: "Fiber 1G",
                    down_mbps: 1000,
                    up_mbps: 1000,
                    addon_price: 10.0,
                    default: false,
                },
                ServicePackage {
                    code: "2G",
                    name: "Fiber 2G",
                    down_mbps: 2000,
                    up_mbps: 2000,
                    addon_price: 20.0,
                    default: false,
                },
            ],
        }
    }

    pub fn all(&self) -> &[ServicePackage] {
        &self.packages
    }

    pub fn default_package(&self) -> &ServicePackage {
        self.packages
            .iter()
            .find(|pkg| pkg.default)
            .unwrap_or(&self.packages[0])
    }

    pub fn by_code(&self, code: &str) -> Option<&ServicePackage> {
        self.packages
            .iter()
            .find(|pkg| pkg.code.eq_ignore_ascii_case(code))
    }

    /// Resolve a speed token pulled out of ticket text ("1g", "gigabit").
    pub fn resolve_speed_token(&self, token: &str) -> Option<&ServicePackage> {
        let token = token.trim().to_ascii_lowercase();
        let code = match token.as_str() {
            "gigabit" | "gig" => "1g".to_string(),
            other => other.to_string(),
        };
        self.packages
            .iter()
            .find(|pkg| pkg.code.to_ascii_lowercase() == code)
    }
}

/// Keyword lists driving ticket classification.
#[derive(Debug, Clone)]
pub struct KeywordConfig {
    pub upgrade: Vec<String>,
    pub support: Vec<String>,
}

impl KeywordConfig {
    fn from_env() -> Self {
        Self {
            upgrade: list_or("FIBER_UPGRADE_KEYWORDS", &["upgrade", "1g", "2g", "gigabit"]),
            support: list_or(
                "FIBER_SUPPORT_KEYWORDS",
                &[
                    "internet", "wifi", "wi-fi", "fiber", "router", "outage", "slow", "no connection",
                ],
            ),
        }
    }
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn list_or(name: &str, defaults: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|item| item.trim().to_lowercase())
            .filter(|item| !item.is_empty())
            .collect(),
        _ => defaults.iter().map(|item| item.to_string()).collect(),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVar { name: &'static str },
    InvalidVar { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVar { name } => write!(f, "{} must be set", name),
            ConfigError::InvalidVar { name } => write!(f, "{} could not be parsed", name),
        }
    }
}

impl std::error::Error for ConfigError {}
