//! Client configuration with YAML support

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CdApiError, Result};

/// Default authentication endpoint
pub const DEFAULT_AUTH_URL: &str = "https://customer.bmwgroup.com/gcdm/oauth/authenticate";

/// Length of a vehicle identification number
pub const VIN_LENGTH: usize = 17;

/// ConnectedDrive client configuration
///
/// Can be loaded from YAML or constructed with [`ClientConfig::builder`]:
///
/// ```yaml
/// credentials:
///   username: "driver@example.com"
///   password: "secret"
///
/// vehicle:
///   vin: "WBY1Z21000V123456"
///   base_url: "https://www.bmw-connecteddrive.de/api"
///   display_name: "i3"
///
/// polling:
///   update_interval_secs: 600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Account credentials
    pub credentials: Credentials,

    /// Vehicle this client talks to
    pub vehicle: VehicleIdentity,

    /// Credential exchange parameters
    #[serde(default)]
    pub auth: AuthConfig,

    /// HTTP timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Update throttle and command polling cadence
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Account credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Vehicle identity, immutable for the lifetime of a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleIdentity {
    /// 17-character vehicle identification number
    pub vin: String,

    /// API origin, e.g. `https://www.bmw-connecteddrive.de/api`
    pub base_url: String,

    /// Optional label for the car
    #[serde(default)]
    pub display_name: Option<String>,
}

impl VehicleIdentity {
    /// Build an identity for a regional ConnectedDrive domain
    /// (e.g. `www.bmw-connecteddrive.nl`)
    pub fn for_domain(vin: impl Into<String>, domain: &str) -> Self {
        Self {
            vin: vin.into(),
            base_url: format!("https://{}/api", domain.trim_end_matches('/')),
            display_name: None,
        }
    }

    /// Name used in log lines and console output
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.vin)
    }
}

/// Parameters of the password-grant style credential exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_url")]
    pub url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_state")]
    pub state: String,

    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: default_auth_url(),
            client_id: default_client_id(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            state: default_state(),
            locale: default_locale(),
        }
    }
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_client_id() -> String {
    "dbf0a542-ebd1-4ff0-a9a7-55172fbfce35".to_string()
}

fn default_redirect_uri() -> String {
    "https://www.bmw-connecteddrive.com/app/default/static/external-dispatch.html".to_string()
}

fn default_scope() -> String {
    "authenticate_user fupo".to_string()
}

fn default_state() -> String {
    "eyJtYXJrZXQiOiJkZSIsImxhbmd1YWdlIjoiZGUiLCJkZXN0aW5hdGlvbiI6ImxhbmRpbmdQYWdlIn0".to_string()
}

fn default_locale() -> String {
    "DE-de".to_string()
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// General request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Update throttle and remote command polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Minimum time between two data refreshes in seconds (default: 10 minutes)
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    /// Number of execution-state polls after a command is accepted (default: 9)
    #[serde(default = "default_command_attempts")]
    pub command_max_attempts: u32,

    /// Wait before each execution-state poll in milliseconds (default: 10s)
    #[serde(default = "default_command_poll_interval")]
    pub command_poll_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            command_max_attempts: default_command_attempts(),
            command_poll_ms: default_command_poll_interval(),
        }
    }
}

fn default_update_interval() -> u64 {
    600 // 10 minutes
}

fn default_command_attempts() -> u32 {
    9
}

fn default_command_poll_interval() -> u64 {
    10_000 // 10 seconds
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| CdApiError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| CdApiError::InvalidConfig(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(
        username: impl Into<String>,
        password: impl Into<String>,
        vehicle: VehicleIdentity,
    ) -> ClientConfigBuilder {
        ClientConfigBuilder::new(username, password, vehicle)
    }

    /// Check the configuration for values the API will never accept
    pub fn validate(&self) -> Result<()> {
        let vin = &self.vehicle.vin;
        if vin.len() != VIN_LENGTH || !vin.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CdApiError::InvalidConfig(format!(
                "VIN must be {} alphanumeric characters, got {:?}",
                VIN_LENGTH, vin
            )));
        }
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(CdApiError::InvalidConfig(
                "username and password are required".into(),
            ));
        }
        if self.polling.command_max_attempts == 0 {
            return Err(CdApiError::InvalidConfig(
                "command_max_attempts must be at least 1".into(),
            ));
        }
        url::Url::parse(&self.vehicle.base_url)?;
        url::Url::parse(&self.auth.url)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.polling.update_interval_secs)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.command_poll_ms)
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default auth, timeouts and polling
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        vehicle: VehicleIdentity,
    ) -> Self {
        Self {
            config: ClientConfig {
                credentials: Credentials {
                    username: username.into(),
                    password: password.into(),
                },
                vehicle,
                auth: AuthConfig::default(),
                timeouts: TimeoutsConfig::default(),
                polling: PollingConfig::default(),
            },
        }
    }

    /// Set the authentication endpoint
    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth.url = url.into();
        self
    }

    /// Set the display name of the car
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.vehicle.display_name = Some(name.into());
        self
    }

    /// Set the minimum time between data refreshes
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.polling.update_interval_secs = interval.as_secs();
        self
    }

    /// Set the command execution-state poll budget
    pub fn command_polling(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.config.polling.command_max_attempts = max_attempts;
        self.config.polling.command_poll_ms = millis(interval);
        self
    }

    /// Set request and connect timeouts
    pub fn timeouts(mut self, request: Duration, connect: Duration) -> Self {
        self.config.timeouts.request_ms = millis(request);
        self.config.timeouts.connect_ms = millis(connect);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Whole milliseconds of `d`, saturating at `u64::MAX`
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIN: &str = "WBY1Z21000V123456";

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
credentials:
  username: "driver@example.com"
  password: "secret"

vehicle:
  vin: "WBY1Z21000V123456"
  base_url: "https://www.bmw-connecteddrive.nl/api"

polling:
  update_interval_secs: 1200
"#;

        let config = ClientConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.credentials.username, "driver@example.com");
        assert_eq!(config.vehicle.vin, VIN);
        assert_eq!(config.vehicle.display_name, None);
        assert_eq!(config.polling.update_interval_secs, 1200);
        assert_eq!(config.polling.command_max_attempts, 9);
        assert_eq!(config.polling.command_poll_ms, 10_000);
        assert_eq!(config.auth.url, DEFAULT_AUTH_URL);
        assert_eq!(config.auth.scope, "authenticate_user fupo");
        assert_eq!(config.timeouts.request_ms, 30_000);
    }

    #[test]
    fn test_yaml_rejects_short_vin() {
        let yaml = r#"
credentials:
  username: "a"
  password: "b"
vehicle:
  vin: "WBY1Z"
  base_url: "https://www.bmw-connecteddrive.de/api"
"#;
        let err = ClientConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CdApiError::InvalidConfig(_)));
    }

    #[test]
    fn test_builder() {
        let vehicle = VehicleIdentity::for_domain(VIN, "www.bmw-connecteddrive.de/");
        let config = ClientConfig::builder("user", "pass", vehicle)
            .display_name("i3")
            .auth_url("http://127.0.0.1:9999/gcdm/oauth/authenticate")
            .command_polling(3, Duration::from_millis(5))
            .build();

        assert_eq!(
            config.vehicle.base_url,
            "https://www.bmw-connecteddrive.de/api"
        );
        assert_eq!(config.vehicle.label(), "i3");
        assert_eq!(config.polling.command_max_attempts, 3);
        assert_eq!(config.command_poll_interval(), Duration::from_millis(5));
        assert_eq!(config.update_interval(), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_saturates_huge_durations() {
        let vehicle = VehicleIdentity::for_domain(VIN, "www.bmw-connecteddrive.de");
        let config = ClientConfig::builder("user", "pass", vehicle)
            .command_polling(9, Duration::MAX)
            .timeouts(Duration::MAX, Duration::from_millis(1500))
            .build();

        assert_eq!(config.polling.command_poll_ms, u64::MAX);
        assert_eq!(config.timeouts.request_ms, u64::MAX);
        assert_eq!(config.timeouts.connect_ms, 1500);
    }

    #[test]
    fn test_validate_rejects_empty_credentials() {
        let vehicle = VehicleIdentity::for_domain(VIN, "www.bmw-connecteddrive.de");
        let config = ClientConfig::builder("", "pass", vehicle).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "user".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let vehicle = VehicleIdentity::for_domain(VIN, "www.bmw-connecteddrive.co.uk");
        let config = ClientConfig::builder("user", "pass", vehicle)
            .update_interval(Duration::from_secs(1800))
            .build();

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), config.to_yaml().unwrap()).unwrap();

        let loaded = ClientConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded.vehicle.base_url, "https://www.bmw-connecteddrive.co.uk/api");
        assert_eq!(loaded.polling.update_interval_secs, 1800);
        assert_eq!(loaded.credentials.password, "pass");
    }

    #[test]
    fn test_missing_yaml_file() {
        let err = ClientConfig::from_yaml_file("/nonexistent/cdapi.yaml").unwrap_err();
        assert!(matches!(err, CdApiError::IoError(_)));
    }

    #[test]
    fn test_label_falls_back_to_vin() {
        let vehicle = VehicleIdentity::for_domain(VIN, "www.bmw-connecteddrive.de");
        assert_eq!(vehicle.label(), VIN);
    }
}
