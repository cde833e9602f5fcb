use crate::config::MonitorConfig;

/// Restart policy derived from a process's effective monitor config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of relaunches for a process lineage
    pub max_attempts: u32,
}

/// What the auto-restart loop should do with a dead process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch; `attempt` is the 1-based number of this relaunch
    Relaunch { attempt: u32 },
    /// Auto-restart disabled, drop the entry
    Evict,
    /// Every attempt was used, drop the entry and report it
    Exhausted { attempts: u32 },
}

impl RestartPolicy {
    pub fn new(enabled: bool, max_attempts: u32) -> Self {
        Self {
            enabled,
            max_attempts,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.auto_restart, config.max_restart_attempts)
    }

    /// Decide based on the number of relaunches already made
    pub fn decide(&self, attempts_made: u32) -> RestartDecision {
        if !self.enabled {
            return RestartDecision::Evict;
        }

        if attempts_made < self.max_attempts {
            RestartDecision::Relaunch {
                attempt: attempts_made + 1,
            }
        } else {
            RestartDecision::Exhausted {
                attempts: attempts_made,
            }
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_from_config() {
        let mut config = MonitorConfig::default();
        config.auto_restart = true;
        config.max_restart_attempts = 5;

        let policy = RestartPolicy::from_config(&config);
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_restart_policy_default_is_disabled() {
        let policy = RestartPolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_restart_policy_disabled() {
        let policy = RestartPolicy::new(false, 10);
        assert_eq!(policy.decide(0), RestartDecision::Evict);
    }

    #[test]
    fn test_restart_policy_counts_up_to_limit() {
        let policy = RestartPolicy::new(true, 3);

        assert_eq!(policy.decide(0), RestartDecision::Relaunch { attempt: 1 });
        assert_eq!(policy.decide(1), RestartDecision::Relaunch { attempt: 2 });
        assert_eq!(policy.decide(2), RestartDecision::Relaunch { attempt: 3 });
        assert_eq!(policy.decide(3), RestartDecision::Exhausted { attempts: 3 });
    }

    #[test]
    fn test_zero_attempts_is_exhausted_immediately() {
        let policy = RestartPolicy::new(true, 0);
        assert_eq!(policy.decide(0), RestartDecision::Exhausted { attempts: 0 });
    }
}
