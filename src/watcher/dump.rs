// Text dump of a single process for diagnostics

use crate::config::MonitorConfig;
use crate::process::{Pid, ProcessInfo};
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::time::Duration;

/// Render a process snapshot as text
///
/// # Arguments
/// * `info` - The snapshot to render
/// * `detailed` - Include command line, user, memory breakdown, priority,
///   I/O, children and monitor config
/// * `config` - Effective monitor config, if the process is monitored
/// * `children` - Child PIDs to list in the detailed view
pub fn render(
    info: &ProcessInfo,
    detailed: bool,
    config: Option<&MonitorConfig>,
    children: &[Pid],
) -> String {
    let mut out = String::new();
    let started: DateTime<Local> = info.start_time.into();

    // Writing to a String cannot fail
    let _ = writeln!(out, "Process {} ({})", info.pid, info.name);
    let _ = writeln!(out, "  {:<13} {}", "Status:", info.status);
    let _ = writeln!(out, "  {:<13} {}", "Parent PID:", info.parent_pid);
    let _ = writeln!(out, "  {:<13} {:.1}%", "CPU:", info.cpu_usage_percent);
    let _ = writeln!(out, "  {:<13} {}", "Memory:", format_kb(info.memory_usage_kb));
    let _ = writeln!(out, "  {:<13} {}", "Threads:", info.thread_count);
    let _ = writeln!(
        out,
        "  {:<13} {}",
        "Started:",
        started.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "  {:<13} {}", "Uptime:", format_duration(&info.uptime));

    if !detailed {
        return out;
    }

    let command = if info.command_line.is_empty() {
        "-".to_string()
    } else {
        info.command_string()
    };
    let user = if info.username.is_empty() {
        "-"
    } else {
        info.username.as_str()
    };

    let _ = writeln!(out, "  {:<13} {}", "Command:", command);
    let _ = writeln!(out, "  {:<13} {}", "User:", user);
    let _ = writeln!(
        out,
        "  {:<13} resident {}, virtual {}, shared {}",
        "Memory map:",
        format_kb(info.memory_usage_kb),
        format_kb(info.virtual_memory_kb),
        format_kb(info.shared_memory_kb)
    );
    let _ = writeln!(out, "  {:<13} {}", "Priority:", info.priority);
    let _ = writeln!(
        out,
        "  {:<13} read {} ({}/s), written {} ({}/s)",
        "I/O:",
        format_bytes(info.io_stats.read_bytes),
        format_bytes(info.io_stats.read_rate as u64),
        format_bytes(info.io_stats.write_bytes),
        format_bytes(info.io_stats.write_rate as u64)
    );

    let children = if children.is_empty() {
        "none".to_string()
    } else {
        children
            .iter()
            .map(|pid| pid.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let _ = writeln!(out, "  {:<13} {}", "Children:", children);

    match config {
        Some(config) => {
            let _ = writeln!(
                out,
                "  {:<13} every {} ms, children {}, auto-restart {} (max {}), cpu limit {}, memory limit {}",
                "Monitor:",
                config.update_interval_ms,
                yes_no(config.monitor_children),
                yes_no(config.auto_restart),
                config.max_restart_attempts,
                if config.resource_limits.has_cpu_limit() {
                    format!("{:.1}%", config.resource_limits.max_cpu_percent)
                } else {
                    "none".to_string()
                },
                if config.resource_limits.has_memory_limit() {
                    format_kb(config.resource_limits.max_memory_kb)
                } else {
                    "none".to_string()
                },
            );
        }
        None => {
            let _ = writeln!(out, "  {:<13} not monitored", "Monitor:");
        }
    }

    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Format a duration in human-readable format
pub(crate) fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format a byte count in human-readable format
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

pub(crate) fn format_kb(kb: u64) -> String {
    format_bytes(kb.saturating_mul(1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessInfo {
        let mut info = ProcessInfo::placeholder(4242, "worker");
        info.parent_pid = 1;
        info.memory_usage_kb = 2048;
        info.thread_count = 3;
        info.uptime = Duration::from_secs(90);
        info.command_line = vec!["/usr/bin/worker".to_string(), "--queue".to_string()];
        info.username = "svc".to_string();
        info
    }

    #[test]
    fn test_summary_dump() {
        let text = render(&sample(), false, None, &[]);

        assert!(text.starts_with("Process 4242 (worker)"));
        assert!(text.contains("running"));
        assert!(text.contains("2.0MB"));
        assert!(text.contains("1m 30s"));
        assert!(!text.contains("Command:"));
    }

    #[test]
    fn test_detailed_dump() {
        let config = MonitorConfig {
            auto_restart: true,
            ..MonitorConfig::default()
        };
        let text = render(&sample(), true, Some(&config), &[7, 9]);

        assert!(text.contains("/usr/bin/worker --queue"));
        assert!(text.contains("svc"));
        assert!(text.contains("7, 9"));
        assert!(text.contains("auto-restart yes (max 3)"));
        assert!(text.contains("memory limit none"));
    }

    #[test]
    fn test_detailed_dump_unmonitored() {
        let mut info = sample();
        info.command_line.clear();
        let text = render(&info, true, None, &[]);

        assert!(text.contains("not monitored"));
        assert!(text.contains("Children:     none"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_kb(2048), "2.0MB");
        assert_eq!(format_kb(3 * 1024 * 1024), "3.00GB");
    }
}
