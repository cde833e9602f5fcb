use crate::process::ProcessInfo;
use serde::{Deserialize, Serialize};

/// Per-process resource ceilings. Zero means "no limit" for either field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum CPU usage percentage
    #[serde(default)]
    pub max_cpu_percent: f64,
    /// Maximum resident memory in KB
    #[serde(default)]
    pub max_memory_kb: u64,
}

impl ResourceLimits {
    pub fn new(max_cpu_percent: f64, max_memory_kb: u64) -> Self {
        Self {
            max_cpu_percent,
            max_memory_kb,
        }
    }

    /// Limits that can never be violated
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn has_cpu_limit(&self) -> bool {
        self.max_cpu_percent > 0.0
    }

    pub fn has_memory_limit(&self) -> bool {
        self.max_memory_kb > 0
    }

    pub fn is_unlimited(&self) -> bool {
        !self.has_cpu_limit() && !self.has_memory_limit()
    }

    /// Compare a snapshot against these limits
    ///
    /// # Returns
    /// * `Some(Violation)` - at least one configured limit is exceeded
    /// * `None` - within limits, or no limits configured
    pub fn check(&self, info: &ProcessInfo) -> Option<Violation> {
        let violation = Violation {
            cpu: self.has_cpu_limit() && info.cpu_usage_percent > self.max_cpu_percent,
            memory: self.has_memory_limit() && info.memory_usage_kb > self.max_memory_kb,
        };

        violation.any().then_some(violation)
    }
}

/// Which limits a process exceeded in one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Violation {
    pub cpu: bool,
    pub memory: bool,
}

impl Violation {
    pub fn any(&self) -> bool {
        self.cpu || self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, memory_kb: u64) -> ProcessInfo {
        let mut info = ProcessInfo::placeholder(10, "sample");
        info.cpu_usage_percent = cpu;
        info.memory_usage_kb = memory_kb;
        info
    }

    #[test]
    fn test_resource_limits_new() {
        let limits = ResourceLimits::new(50.0, 1024);
        assert_eq!(limits.max_cpu_percent, 50.0);
        assert_eq!(limits.max_memory_kb, 1024);
        assert!(limits.has_cpu_limit());
        assert!(limits.has_memory_limit());
    }

    #[test]
    fn test_zero_means_unlimited() {
        let limits = ResourceLimits::unlimited();
        assert!(limits.is_unlimited());
        assert_eq!(limits.check(&sample(10_000.0, u64::MAX)), None);
    }

    #[test]
    fn test_memory_violation() {
        let limits = ResourceLimits::new(0.0, 1);
        let violation = limits.check(&sample(0.0, 512)).unwrap();
        assert!(violation.memory);
        assert!(!violation.cpu);
    }

    #[test]
    fn test_cpu_violation_is_strictly_greater() {
        let limits = ResourceLimits::new(50.0, 0);
        assert_eq!(limits.check(&sample(50.0, 0)), None);

        let violation = limits.check(&sample(50.1, 0)).unwrap();
        assert!(violation.cpu);
    }

    #[test]
    fn test_both_violations() {
        let limits = ResourceLimits::new(10.0, 100);
        let violation = limits.check(&sample(20.0, 200)).unwrap();
        assert!(violation.cpu && violation.memory);
    }
}
