//! Configuration module

use std::collections::HashSet;
use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Vendor cloud endpoints. Both surfaces are fixed external contracts.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_account_base_url")]
    pub account_base_url: String,
    #[serde(default = "default_device_base_url")]
    pub device_base_url: String,
    #[serde(default = "default_account_user_agent")]
    pub account_user_agent: String,
    #[serde(default = "default_device_user_agent")]
    pub device_user_agent: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl CloudConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            account_base_url: default_account_base_url(),
            device_base_url: default_device_base_url(),
            account_user_agent: default_account_user_agent(),
            device_user_agent: default_device_user_agent(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_update_timeout")]
    pub update_timeout_secs: u64,
    /// Averaging frame: history older than this is pruned on every read
    #[serde(default = "default_retention_window")]
    pub retention_window_secs: i64,
    /// A device is not re-fetched while its newest sample is younger than this
    #[serde(default = "default_min_refetch_interval")]
    pub min_refetch_interval_secs: i64,
}

impl PollingConfig {
    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            update_timeout_secs: default_update_timeout(),
            retention_window_secs: default_retention_window(),
            min_refetch_interval_secs: default_min_refetch_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    /// Device names to poll; empty means every device on the account
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub receive_tvoc_in_ppb: bool,
    #[serde(default)]
    pub receive_hcho_in_ppb: bool,
    #[serde(default)]
    pub scan_interval_secs: Option<u64>,
}

impl AccountConfig {
    pub fn scan_interval(&self, polling: &PollingConfig) -> Duration {
        Duration::from_secs(self.scan_interval_secs.unwrap_or(polling.scan_interval_secs))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_account_base_url() -> String {
    "http://www.youpinyuntai.com:32086/ypyt-api/api/app/".to_string()
}

fn default_device_base_url() -> String {
    "https://www.youpinyuntai.com:31447/device/".to_string()
}

fn default_account_user_agent() -> String {
    "Apache-HttpClient/UNAVAILABLE (java 1.4)".to_string()
}

fn default_device_user_agent() -> String {
    "Mozilla/5.0 (Linux; Android 10; MI 9 Build/QKQ1.190825.002; wv) AppleWebKit/537.36 \
     (KHTML, like Gecko) Version/4.0 Chrome/83.0.4103.101 Mobile Safari/537.36"
        .to_string()
}

fn default_query_timeout() -> u64 {
    7
}

fn default_scan_interval() -> u64 {
    30
}

fn default_update_timeout() -> u64 {
    60
}

fn default_retention_window() -> i64 {
    300
}

fn default_min_refetch_interval() -> i64 {
    10
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("JQ300").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Check the whole config, reporting every problem found rather than the first.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, account) in self.accounts.iter().enumerate() {
            if account.username.trim().is_empty() {
                errors.push(format!("accounts[{i}]: username is empty"));
            } else if !seen.insert(account.username.as_str()) {
                errors.push(format!("accounts[{i}]: duplicate username"));
            }
            if account.password.is_empty() {
                errors.push(format!("accounts[{i}]: password is empty"));
            }
            if account.scan_interval_secs == Some(0) {
                errors.push(format!("accounts[{i}]: scan_interval_secs must be positive"));
            }
        }

        let p = &self.polling;
        if p.scan_interval_secs == 0 {
            errors.push("polling.scan_interval_secs must be positive".to_string());
        }
        if p.update_timeout_secs == 0 {
            errors.push("polling.update_timeout_secs must be positive".to_string());
        }
        if p.retention_window_secs <= 0 {
            errors.push("polling.retention_window_secs must be positive".to_string());
        }
        if p.min_refetch_interval_secs < 0 {
            errors.push("polling.min_refetch_interval_secs must not be negative".to_string());
        }
        if p.min_refetch_interval_secs >= p.retention_window_secs {
            errors.push(format!(
                "polling.min_refetch_interval_secs ({}) must be smaller than retention_window_secs ({})",
                p.min_refetch_interval_secs, p.retention_window_secs
            ));
        }
        if self.cloud.query_timeout_secs == 0 {
            errors.push("cloud.query_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(username: &str) -> AccountConfig {
        AccountConfig {
            username: username.to_string(),
            password: "secret".to_string(),
            devices: vec![],
            receive_tvoc_in_ppb: false,
            receive_hcho_in_ppb: false,
            scan_interval_secs: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            server: ServerConfig::default(),
            cloud: CloudConfig::default(),
            polling: PollingConfig::default(),
            accounts: vec![account("user@example.com")],
        }
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_duplicate_and_empty_accounts() {
        let mut cfg = valid_config();
        cfg.accounts.push(account("user@example.com"));
        cfg.accounts.push(account(" "));

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("2 errors"), "{msg}");
        assert!(msg.contains("accounts[1]: duplicate username"));
        assert!(msg.contains("accounts[2]: username is empty"));
    }

    #[test]
    fn test_refetch_interval_must_fit_in_window() {
        let mut cfg = valid_config();
        cfg.polling.min_refetch_interval_secs = 300;

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("must be smaller than retention_window_secs"));
    }

    #[test]
    fn test_per_account_scan_interval_override() {
        let polling = PollingConfig::default();
        let mut acc = account("user@example.com");
        assert_eq!(acc.scan_interval(&polling), Duration::from_secs(30));

        acc.scan_interval_secs = Some(120);
        assert_eq!(acc.scan_interval(&polling), Duration::from_secs(120));
    }

    #[test]
    fn test_deserialize_account_defaults() {
        let acc: AccountConfig = serde_json::from_value(serde_json::json!({
            "username": "user@example.com",
            "password": "pw"
        }))
        .unwrap();

        assert!(acc.devices.is_empty());
        assert!(!acc.receive_tvoc_in_ppb);
        assert!(!acc.receive_hcho_in_ppb);
        assert_eq!(acc.scan_interval_secs, None);
    }
}
