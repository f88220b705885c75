// src/config.rs

use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::targets::{JobDescription, SniMap};

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub enabled: bool,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgresql://localhost/x509".to_string()
}

fn default_max_connections() -> u32 {
    20
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_parallelism() -> usize { 256 }
fn default_timeout_secs() -> u64 { 5 }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A named set of address blocks and port ranges
#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    pub name: String,
    pub cidrs: Vec<String>,
    pub ports: Vec<String>,
}

impl JobConfig {
    pub fn description(&self) -> Result<JobDescription, ConfigError> {
        JobDescription::parse(&self.cidrs, &self.ports)
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub jobs: Vec<JobConfig>,
    /// Extra SNI hostnames keyed by literal IP address
    #[serde(default)]
    pub sni: HashMap<String, Vec<String>>,
}

impl Config {
    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check everything that can be checked before a scan starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.parallelism == 0 {
            return Err(ConfigError::InvalidJob("scan.parallelism must be at least 1".to_string()));
        }
        if self.scan.timeout_secs == 0 {
            return Err(ConfigError::InvalidJob("scan.timeout_secs must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::InvalidJob("job name must not be empty".to_string()));
            }
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::InvalidJob(format!("duplicate job name '{}'", job.name)));
            }
            job.description()?;
        }

        self.sni_map()?;
        Ok(())
    }

    pub fn sni_map(&self) -> Result<SniMap, ConfigError> {
        SniMap::from_config(&self.sni)
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Jobs named on the command line, or every job when none are named
    pub fn select_jobs(&self, names: &[String]) -> Result<Vec<&JobConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.jobs.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.job(name)
                    .ok_or_else(|| ConfigError::InvalidJob(format!("unknown job '{}'", name)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_config_from_valid_toml() {
        let temp_file = write_config(
            r#"
[logging]
level = "debug"

[database]
enabled = true
url = "postgresql://scanner@db/x509"
max_connections = 5

[scan]
parallelism = 64
timeout_secs = 3

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443", "8443-8445"]

[[jobs]]
name = "office"
cidrs = ["10.0.0.0/16, 10.1.0.0/16"]
ports = ["443"]

[sni]
"198.51.100.10" = ["www.example.com", "mail.example.com"]
            "#,
        );

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.database.enabled);
        assert_eq!(config.database.url, "postgresql://scanner@db/x509");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.scan.parallelism, 64);
        assert_eq!(config.scan.timeout(), Duration::from_secs(3));
        assert_eq!(config.jobs.len(), 2);

        let dmz = config.job("dmz").unwrap().description().unwrap();
        assert_eq!(dmz.blocks.len(), 1);
        assert_eq!(dmz.port_count(), 4);
        let office = config.job("office").unwrap().description().unwrap();
        assert_eq!(office.blocks.len(), 2);

        let sni = config.sni_map().unwrap();
        let ip = "198.51.100.10".parse().unwrap();
        assert_eq!(sni.hostnames_for(&ip), vec!["www.example.com", "mail.example.com", ""]);
    }

    #[test]
    fn test_config_minimal_toml() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443"]
            "#,
        );

        let config = Config::from_file(temp_file.path()).unwrap();

        assert!(!config.database.enabled);
        assert_eq!(config.database.url, "postgresql://localhost/x509");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.scan.parallelism, 256);
        assert_eq!(config.scan.timeout_secs, 5);
        assert!(config.sni.is_empty());
    }

    #[test]
    fn test_config_invalid_toml() {
        let temp_file = write_config("invalid toml content {{{");
        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_missing_required_fields() {
        let temp_file = write_config(
            r#"
[[jobs]]
name = "dmz"
cidrs = []
ports = []
            "#,
        );
        // Missing logging section
        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_nonexistent_file() {
        assert!(Config::from_file(Path::new("/nonexistent/path/config.toml")).is_err());
    }

    #[test]
    fn test_malformed_cidr_is_config_error() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/33"]
ports = ["443"]
            "#,
        );

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn test_bad_sni_key_is_config_error() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443"]

[sni]
"www.example.com" = ["www.example.com"]
            "#,
        );

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::InvalidSniKey("www.example.com".to_string()))
        );
    }

    #[test]
    fn test_duplicate_job_names_rejected() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443"]

[[jobs]]
name = "dmz"
cidrs = ["203.0.113.0/24"]
ports = ["443"]
            "#,
        );

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::InvalidJob(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[scan]
parallelism = 0

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443"]
            "#,
        );

        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_select_jobs() {
        let temp_file = write_config(
            r#"
[logging]
level = "info"

[[jobs]]
name = "dmz"
cidrs = ["198.51.100.0/24"]
ports = ["443"]

[[jobs]]
name = "office"
cidrs = ["10.0.0.0/24"]
ports = ["443"]
            "#,
        );
        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.select_jobs(&[]).unwrap().len(), 2);

        let selected = config.select_jobs(&["office".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "office");

        assert!(config.select_jobs(&["lab".to_string()]).is_err());
    }
}
