//! Configuration file handling for cdapi

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cdapi_client::{ClientConfig, VehicleIdentity};
use serde::{Deserialize, Serialize};

/// Regional domain used when neither flag nor file names one
pub const DEFAULT_DOMAIN: &str = "www.bmw-connecteddrive.de";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Account user name (e-mail)
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Vehicle identification number
    pub vin: Option<String>,
    /// Regional ConnectedDrive domain
    pub domain: Option<String>,
    /// Display name for the car
    pub name: Option<String>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Minimum time between status updates
    pub update_interval_minutes: Option<u64>,
    /// Authentication endpoint override
    pub auth_url: Option<String>,
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ArgOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub vin: Option<String>,
    pub domain: Option<String>,
    pub name: Option<String>,
    pub output: Option<String>,
    pub no_color: bool,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("cdapi");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: ArgOverrides) -> MergedConfig {
        MergedConfig {
            username: args.username.or_else(|| self.username.clone()),
            password: args.password.or_else(|| self.password.clone()),
            vin: args.vin.or_else(|| self.vin.clone()),
            domain: args
                .domain
                .or_else(|| self.domain.clone())
                .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
            name: args.name.or_else(|| self.name.clone()),
            output: args
                .output
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
            update_interval_minutes: self.update_interval_minutes,
            auth_url: self.auth_url.clone(),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub vin: Option<String>,
    pub domain: String,
    pub name: Option<String>,
    pub output: String,
    pub no_color: bool,
    pub update_interval_minutes: Option<u64>,
    pub auth_url: Option<String>,
}

impl MergedConfig {
    /// Build the client configuration, failing if credentials or VIN are missing
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let Some(username) = self.username.as_deref() else {
            bail!("No username given. Pass --username, set CDAPI_USERNAME or add it to the config file");
        };
        let Some(password) = self.password.as_deref() else {
            bail!("No password given. Pass --password, set CDAPI_PASSWORD or add it to the config file");
        };
        let Some(vin) = self.vin.as_deref() else {
            bail!("No VIN given. Pass --vin, set CDAPI_VIN or add it to the config file");
        };

        let vehicle = VehicleIdentity::for_domain(vin, &self.domain);
        let mut builder = ClientConfig::builder(username, password, vehicle);
        if let Some(name) = &self.name {
            builder = builder.display_name(name.clone());
        }
        if let Some(minutes) = self.update_interval_minutes {
            builder = builder.update_interval(Duration::from_secs(minutes.saturating_mul(60)));
        }
        if let Some(url) = &self.auth_url {
            builder = builder.auth_url(url.clone());
        }

        let config = builder.build();
        config.validate().context("Invalid client configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VIN: &str = "WBY1Z21000V123456";

    fn args() -> ArgOverrides {
        ArgOverrides {
            username: Some("driver@example.com".into()),
            password: Some("secret".into()),
            vin: Some(VIN.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
username = "file@example.com"
vin = "{VIN}"
domain = "www.bmw-connecteddrive.co.uk"
output = "json"
update_interval_minutes = 15
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.username.as_deref(), Some("file@example.com"));
        assert_eq!(config.update_interval_minutes, Some(15));
        assert!(config.password.is_none());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "username = [").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_args_override_file() {
        let config = Config {
            username: Some("file@example.com".into()),
            domain: Some("www.bmw-connecteddrive.co.uk".into()),
            output: Some("csv".into()),
            ..Default::default()
        };

        let merged = config.merge_with_args(args());
        assert_eq!(merged.username.as_deref(), Some("driver@example.com"));
        assert_eq!(merged.domain, "www.bmw-connecteddrive.co.uk");
        assert_eq!(merged.output, "csv");
        assert!(!merged.no_color);
    }

    #[test]
    fn test_defaults_when_nothing_given() {
        let merged = Config::default().merge_with_args(ArgOverrides::default());
        assert_eq!(merged.domain, DEFAULT_DOMAIN);
        assert_eq!(merged.output, "table");
        assert!(merged.username.is_none());
    }

    #[test]
    fn test_to_client_config() {
        let config = Config {
            name: Some("i3".into()),
            update_interval_minutes: Some(20),
            ..Default::default()
        };
        let client = config.merge_with_args(args()).to_client_config().unwrap();

        assert_eq!(client.vehicle.vin, VIN);
        assert_eq!(client.vehicle.base_url, format!("https://{}/api", DEFAULT_DOMAIN));
        assert_eq!(client.vehicle.label(), "i3");
        assert_eq!(client.update_interval(), Duration::from_secs(1200));
    }

    #[test]
    fn test_huge_update_interval_saturates() {
        let config = Config {
            update_interval_minutes: Some(u64::MAX),
            ..Default::default()
        };
        let client = config.merge_with_args(args()).to_client_config().unwrap();
        assert_eq!(client.update_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_missing_password_is_an_error() {
        let mut overrides = args();
        overrides.password = None;
        let err = Config::default()
            .merge_with_args(overrides)
            .to_client_config()
            .unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_bad_vin_is_an_error() {
        let mut overrides = args();
        overrides.vin = Some("123".into());
        let result = Config::default().merge_with_args(overrides).to_client_config();
        assert!(result.is_err());
    }
}
