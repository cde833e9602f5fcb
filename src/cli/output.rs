// Output formatting and display for CLI

use crate::process::{Pid, ProcessInfo, ProcessStats, ProcessStatus, ResourceLimits};
use crate::watcher::dump::{format_duration, format_kb};
use chrono::Local;
use colored::*;
use serde_json::json;
use std::collections::HashMap;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn timestamp() -> String {
    format!("[{}]", Local::now().format("%H:%M:%S"))
        .dimmed()
        .to_string()
}

fn print_event(event: serde_json::Value) {
    println!("{}", event);
}

pub fn print_tick(batch: &[ProcessInfo], json: bool) {
    if json {
        print_event(json!({ "event": "tick", "processes": batch }));
        return;
    }

    for info in batch {
        println!(
            "{} {:>7} {:<20} {:<9} cpu {:>5.1}%  mem {:>8}  threads {}",
            timestamp(),
            info.pid,
            truncate(&info.name, 20),
            format_status_colored(info.status),
            info.cpu_usage_percent,
            format_kb(info.memory_usage_kb),
            info.thread_count
        );
    }
}

pub fn print_exit(info: &ProcessInfo, json: bool) {
    if json {
        print_event(json!({ "event": "exit", "process": info }));
        return;
    }

    println!(
        "{} {}",
        timestamp(),
        format!("Process {} ({}) exited", info.pid, info.name)
            .yellow()
            .bold()
    );
}

pub fn print_violation(info: &ProcessInfo, limits: &ResourceLimits, json: bool) {
    if json {
        print_event(json!({ "event": "limit_exceeded", "process": info, "limits": limits }));
        return;
    }

    println!(
        "{} {} cpu {:.1}% (limit {}), mem {} (limit {})",
        timestamp(),
        format!("Process {} ({}) exceeded its limits:", info.pid, info.name)
            .red()
            .bold(),
        info.cpu_usage_percent,
        if limits.has_cpu_limit() {
            format!("{:.1}%", limits.max_cpu_percent)
        } else {
            "none".to_string()
        },
        format_kb(info.memory_usage_kb),
        if limits.has_memory_limit() {
            format_kb(limits.max_memory_kb)
        } else {
            "none".to_string()
        }
    );
}

pub fn print_created(pid: Pid, command: &str, json: bool) {
    if json {
        print_event(json!({ "event": "created", "pid": pid, "command": command }));
        return;
    }

    println!(
        "{} {} {}",
        timestamp(),
        format!("Started PID {}:", pid).green(),
        command
    );
}

pub fn print_watch_error(message: &str, code: i32, json: bool) {
    if json {
        print_event(json!({ "event": "error", "message": message, "code": code }));
        return;
    }

    print_error(&format!("{} (code {})", message, code));
}

/// Print a table of the last known statistics of every watched process
pub fn print_stats_table(processes: &HashMap<Pid, ProcessInfo>, stats: &HashMap<Pid, ProcessStats>) {
    #[derive(Tabled)]
    struct StatsRow {
        #[tabled(rename = "PID")]
        pid: Pid,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Threads")]
        threads: u32,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Samples")]
        samples: u64,
        #[tabled(rename = "CPU Violations")]
        cpu_violations: usize,
        #[tabled(rename = "Memory Violations")]
        memory_violations: usize,
    }

    if stats.is_empty() {
        println!("{}", "No statistics were collected".yellow());
        return;
    }

    let mut pids: Vec<Pid> = stats.keys().copied().collect();
    pids.sort_unstable();

    let rows: Vec<StatsRow> = pids
        .iter()
        .filter_map(|pid| stats.get(pid).map(|s| (pid, s)))
        .map(|(&pid, s)| {
            let info = processes.get(&pid);
            StatsRow {
                pid,
                name: info
                    .map(|info| truncate(&info.name, 20))
                    .unwrap_or_else(|| "-".to_string()),
                cpu: format!("{:.1}%", s.cpu_usage),
                memory: format_kb(s.memory_kb),
                threads: s.threads,
                uptime: info
                    .map(|info| format_duration(&info.uptime))
                    .unwrap_or_else(|| "-".to_string()),
                samples: s.samples,
                cpu_violations: s.cpu_violations,
                memory_violations: s.memory_violations,
            }
        })
        .collect();

    let total = rows.len();
    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", total).dimmed().italic()
    );
}

/// Format a process status with color coding
fn format_status_colored(status: ProcessStatus) -> String {
    let text = status.to_string();
    match status {
        ProcessStatus::Running => text.green().to_string(),
        ProcessStatus::Sleeping | ProcessStatus::Waiting => text.cyan().to_string(),
        ProcessStatus::Stopped => text.yellow().to_string(),
        ProcessStatus::Zombie | ProcessStatus::Dead => text.red().bold().to_string(),
        ProcessStatus::Unknown => text.bright_black().to_string(),
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
