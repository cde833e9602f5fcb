use crate::error::{WatchError, Result};
use crate::process::{Pid, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Monitoring settings for one process (or the global default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Refresh interval for the monitor loops (in milliseconds)
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,

    /// Whether child processes are discovered and monitored too
    #[serde(default)]
    pub monitor_children: bool,

    /// Whether to relaunch the process when it exits
    #[serde(default)]
    pub auto_restart: bool,

    /// Maximum number of relaunches
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

// Default value functions for serde
fn default_update_interval() -> u64 {
    1000
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_max_updates_per_second() -> u32 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval(),
            monitor_children: false,
            auto_restart: false,
            max_restart_attempts: default_max_restart_attempts(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl MonitorConfig {
    /// Get update interval as Duration
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let cpu = self.resource_limits.max_cpu_percent;
        if !cpu.is_finite() || cpu < 0.0 {
            return Err(WatchError::ConfigValidationError(format!(
                "max_cpu_percent must be a non-negative number, got {}",
                cpu
            )));
        }

        Ok(())
    }
}

/// Cadences of the background loops (all in milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cadence {
    #[serde(default = "default_second")]
    pub exit_check_ms: u64,

    #[serde(default = "default_second")]
    pub resource_check_ms: u64,

    #[serde(default = "default_second")]
    pub auto_restart_ms: u64,

    #[serde(default = "default_watchdog")]
    pub watchdog_ms: u64,

    /// Consecutive silent watchdog windows before recovery
    #[serde(default = "default_watchdog_strikes")]
    pub watchdog_strikes: u32,

    /// How long recovery waits for a loop thread to finish
    #[serde(default = "default_join_grace")]
    pub join_grace_ms: u64,

    /// Monitor sleep when the update interval is zero
    #[serde(default = "default_idle_tick")]
    pub idle_tick_ms: u64,

    /// Monitor sleep after a throttled tick
    #[serde(default = "default_throttle_backoff")]
    pub throttle_backoff_ms: u64,
}

fn default_second() -> u64 {
    1000
}

fn default_watchdog() -> u64 {
    5000
}

fn default_watchdog_strikes() -> u32 {
    3
}

fn default_join_grace() -> u64 {
    2000
}

fn default_idle_tick() -> u64 {
    100
}

fn default_throttle_backoff() -> u64 {
    50
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            exit_check_ms: default_second(),
            resource_check_ms: default_second(),
            auto_restart_ms: default_second(),
            watchdog_ms: default_watchdog(),
            watchdog_strikes: default_watchdog_strikes(),
            join_grace_ms: default_join_grace(),
            idle_tick_ms: default_idle_tick(),
            throttle_backoff_ms: default_throttle_backoff(),
        }
    }
}

impl Cadence {
    pub fn exit_check(&self) -> Duration {
        Duration::from_millis(self.exit_check_ms)
    }

    pub fn resource_check(&self) -> Duration {
        Duration::from_millis(self.resource_check_ms)
    }

    pub fn auto_restart(&self) -> Duration {
        Duration::from_millis(self.auto_restart_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    /// Never zero, so a throttled loop cannot spin on the rate limiter
    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("exit_check_ms", self.exit_check_ms),
            ("resource_check_ms", self.resource_check_ms),
            ("auto_restart_ms", self.auto_restart_ms),
            ("watchdog_ms", self.watchdog_ms),
            ("idle_tick_ms", self.idle_tick_ms),
            ("throttle_backoff_ms", self.throttle_backoff_ms),
            ("join_grace_ms", self.join_grace_ms),
        ];
        for (field, value) in periods {
            if value == 0 {
                return Err(WatchError::ConfigValidationError(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }

        if self.watchdog_strikes == 0 {
            return Err(WatchError::ConfigValidationError(
                "watchdog_strikes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A process to watch, selected by name or by PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub pid: Option<Pid>,

    /// Per-process override; replaces the defaults entirely when present
    #[serde(default)]
    pub config: Option<MonitorConfig>,
}

impl Target {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            pid: None,
            config: None,
        }
    }

    pub fn by_pid(pid: Pid) -> Self {
        Self {
            name: None,
            pid: Some(pid),
            config: None,
        }
    }

    fn validate(&self) -> Result<()> {
        match (&self.name, self.pid) {
            (Some(name), None) if name.is_empty() => Err(WatchError::ConfigValidationError(
                "target name must not be empty".to_string(),
            )),
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(WatchError::ConfigValidationError(
                "target must set either name or pid, not both".to_string(),
            )),
            (None, None) => Err(WatchError::ConfigValidationError(
                "target must set name or pid".to_string(),
            )),
        }?;

        if let Some(ref config) = self.config {
            config.validate()?;
        }

        Ok(())
    }
}

/// Complete engine configuration, usually loaded from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Maximum full refresh cycles per second across all loops
    #[serde(default = "default_max_updates_per_second")]
    pub max_updates_per_second: u32,

    /// Global monitor config used by processes without an override
    #[serde(default)]
    pub defaults: MonitorConfig,

    #[serde(default)]
    pub cadence: Cadence,

    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_updates_per_second: default_max_updates_per_second(),
            defaults: MonitorConfig::default(),
            cadence: Cadence::default(),
            targets: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<WatchConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WatchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WatchError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<WatchConfig> {
        toml::from_str(contents)
            .map_err(|e| WatchError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<WatchConfig> {
        serde_json::from_str(contents)
            .map_err(|e| WatchError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_updates_per_second == 0 {
            return Err(WatchError::ConfigValidationError(
                "max_updates_per_second must be at least 1".to_string(),
            ));
        }

        self.defaults.validate()?;
        self.cadence.validate()?;

        for target in &self.targets {
            target.validate()?;
        }

        Ok(())
    }

    /// Expand environment variables in target names
    fn expand_env_vars(&mut self) {
        for target in &mut self.targets {
            if let Some(ref name) = target.name {
                target.name = Some(expand_env_in_string(name));
            }
        }
    }
}

/// Expand `$VAR` and `${VAR}` references in a string
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_monitor_config_defaults() {
        let config = MonitorConfig::default();

        assert_eq!(config.update_interval(), Duration::from_millis(1000));
        assert!(!config.monitor_children);
        assert!(!config.auto_restart);
        assert_eq!(config.max_restart_attempts, 3);
        assert!(config.resource_limits.is_unlimited());
    }

    #[test]
    fn test_cadence_defaults() {
        let cadence = Cadence::default();

        assert_eq!(cadence.exit_check(), Duration::from_secs(1));
        assert_eq!(cadence.resource_check(), Duration::from_secs(1));
        assert_eq!(cadence.auto_restart(), Duration::from_secs(1));
        assert_eq!(cadence.watchdog(), Duration::from_secs(5));
        assert_eq!(cadence.watchdog_strikes, 3);
        assert!(cadence.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_rate() {
        let config = WatchConfig {
            max_updates_per_second: 0,
            ..WatchConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(WatchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_negative_cpu_limit() {
        let mut config = WatchConfig::default();
        config.defaults.resource_limits.max_cpu_percent = -1.0;

        assert!(matches!(
            config.validate(),
            Err(WatchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_target_needs_exactly_one_selector() {
        let mut config = WatchConfig::default();
        config.targets.push(Target {
            name: Some("nginx".to_string()),
            pid: Some(10),
            config: None,
        });
        assert!(config.validate().is_err());

        config.targets[0].pid = None;
        assert!(config.validate().is_ok());

        config.targets[0].name = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_watchdog_strikes() {
        let mut config = WatchConfig::default();
        config.cadence.watchdog_strikes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_backoff_and_grace() {
        let mut config = WatchConfig::default();
        config.cadence.throttle_backoff_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("throttle_backoff_ms"));

        let mut config = WatchConfig::default();
        config.cadence.join_grace_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_throttle_backoff_is_never_zero() {
        let cadence = Cadence {
            throttle_backoff_ms: 0,
            ..Cadence::default()
        };
        assert_eq!(cadence.throttle_backoff(), Duration::from_millis(1));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("PIDWATCH_TEST_TARGET", "postgres");

        let mut config = WatchConfig::default();
        config.targets.push(Target::by_name("${PIDWATCH_TEST_TARGET}"));
        config.targets.push(Target::by_pid(1));
        config.expand_env_vars();

        assert_eq!(config.targets[0].name.as_deref(), Some("postgres"));
        assert_eq!(config.targets[1].pid, Some(1));
    }

    #[test]
    fn test_parse_toml() {
        let toml_content = r#"
            max_updates_per_second = 4

            [defaults]
            update_interval_ms = 250
            auto_restart = true

            [defaults.resource_limits]
            max_memory_kb = 65536

            [cadence]
            watchdog_ms = 1000

            [[targets]]
            name = "nginx"

            [[targets]]
            pid = 4242

            [targets.config]
            monitor_children = true
        "#;

        let config = WatchConfig::parse_toml(toml_content).unwrap();
        assert_eq!(config.max_updates_per_second, 4);
        assert_eq!(config.defaults.update_interval_ms, 250);
        assert!(config.defaults.auto_restart);
        assert_eq!(config.defaults.max_restart_attempts, 3);
        assert_eq!(config.defaults.resource_limits.max_memory_kb, 65536);
        assert_eq!(config.cadence.watchdog_ms, 1000);
        assert_eq!(config.cadence.exit_check_ms, 1000);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].name.as_deref(), Some("nginx"));

        let override_config = config.targets[1].config.as_ref().unwrap();
        assert!(override_config.monitor_children);
        // Overrides start from the serde defaults, not from [defaults]
        assert!(!override_config.auto_restart);
    }

    #[test]
    fn test_parse_json() {
        let json_content = r#"
            {
                "defaults": { "max_restart_attempts": 5 },
                "targets": [ { "name": "redis" } ]
            }
        "#;

        let config = WatchConfig::parse_json(json_content).unwrap();
        assert_eq!(config.max_updates_per_second, 10);
        assert_eq!(config.defaults.max_restart_attempts, 5);
        assert_eq!(config.targets[0].name.as_deref(), Some("redis"));
    }

    #[test]
    fn test_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("watch.toml");

        fs::write(
            &config_path,
            r#"
                [[targets]]
                name = "sleep"
            "#,
        )
        .unwrap();

        let config = WatchConfig::from_file(&config_path).unwrap();
        assert_eq!(config.targets.len(), 1);
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("watch.yaml");

        fs::write(&config_path, "targets: []").unwrap();

        let result = WatchConfig::from_file(&config_path);
        assert!(matches!(result, Err(WatchError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = WatchConfig::from_file(Path::new("/nonexistent/watch.toml"));
        assert!(matches!(result, Err(WatchError::ConfigError(_))));
    }
}
