// CLI module - Command-line front end over the supervision engine

mod output;

use crate::config::WatchConfig;
use crate::process::{Pid, ProcessInfo, ProcessStats, SystemController, SystemProvider};
use crate::watcher::Watcher;
use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);
const SNAPSHOT_EVERY: Duration = Duration::from_millis(500);

/// pidwatch - Watch processes, report their exits and enforce resource limits
#[derive(Parser)]
#[command(name = "pidwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch running processes until Ctrl-C or until none is left
    Watch {
        /// Process names to watch (prefix match)
        names: Vec<String>,

        /// Process IDs to watch
        #[arg(short, long = "pid")]
        pids: Vec<Pid>,

        /// Engine configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        monitor: MonitorArgs,
    },

    /// Print a diagnostic dump of one process
    Dump {
        pid: Pid,

        /// Include command line, memory map, I/O and children
        #[arg(short, long)]
        detailed: bool,

        /// Write the dump to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Launch a program and watch it
    Launch {
        /// Program to run
        program: String,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        #[command(flatten)]
        monitor: MonitorArgs,
    },
}

/// Overrides applied on top of the configuration defaults
#[derive(Args, Debug, Default)]
struct MonitorArgs {
    /// Refresh interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Maximum refresh cycles per second
    #[arg(long)]
    rate: Option<u32>,

    /// Also watch descendants of every watched process
    #[arg(long)]
    children: bool,

    /// Relaunch processes that exit
    #[arg(long)]
    auto_restart: bool,

    /// Maximum relaunches per process
    #[arg(long)]
    max_restarts: Option<u32>,

    /// CPU usage limit in percent
    #[arg(long)]
    max_cpu: Option<f64>,

    /// Resident memory limit in KB
    #[arg(long)]
    max_memory_kb: Option<u64>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl MonitorArgs {
    fn apply(&self, config: &mut WatchConfig) {
        let defaults = &mut config.defaults;

        if let Some(interval_ms) = self.interval_ms {
            defaults.update_interval_ms = interval_ms;
        }
        if self.children {
            defaults.monitor_children = true;
        }
        if self.auto_restart {
            defaults.auto_restart = true;
        }
        if let Some(max_restarts) = self.max_restarts {
            defaults.max_restart_attempts = max_restarts;
        }
        if let Some(max_cpu) = self.max_cpu {
            defaults.resource_limits.max_cpu_percent = max_cpu;
        }
        if let Some(max_memory_kb) = self.max_memory_kb {
            defaults.resource_limits.max_memory_kb = max_memory_kb;
        }
        if let Some(rate) = self.rate {
            config.max_updates_per_second = rate;
        }
    }
}

/// Last statistics seen while the engine was running. The registry is empty
/// once the engine stops, so the final table is printed from this.
#[derive(Default)]
struct Snapshot {
    processes: HashMap<Pid, ProcessInfo>,
    stats: HashMap<Pid, ProcessStats>,
}

impl Snapshot {
    fn capture(&mut self, watcher: &Watcher) {
        let stats = watcher.monitoring_stats();
        if stats.is_empty() {
            return;
        }

        for &pid in stats.keys() {
            if let Some(info) = watcher.process_info(pid) {
                self.processes.insert(pid, info);
            }
        }
        self.stats.extend(stats);
    }
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        init_logging(cli.verbose);
        cli.execute()
    }

    fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Watch {
                names,
                pids,
                config,
                monitor,
            } => {
                let mut watch_config = match config {
                    Some(path) => WatchConfig::from_file(path)
                        .with_context(|| format!("failed to load {}", path.display()))?,
                    None => WatchConfig::default(),
                };
                monitor.apply(&mut watch_config);
                watch_config.validate()?;

                let watcher = system_watcher(&watch_config, monitor.json);
                let mut watched = watcher.watch_targets(&watch_config.targets);
                watched += watcher.start_multiple(names.as_slice(), None);
                watched += pids
                    .iter()
                    .filter(|&&pid| watcher.start_by_pid(pid, None).is_ok())
                    .count();

                if watched == 0 {
                    bail!("no process could be watched");
                }
                output::print_info(&format!("Watching {} process(es), Ctrl-C to stop", watched));
                supervise(&watcher)
            }

            Commands::Dump {
                pid,
                detailed,
                output: path,
            } => {
                let watcher = Watcher::system();
                let text = watcher.dump_process_info(*pid, *detailed, path.as_deref())?;
                match path {
                    Some(path) => {
                        output::print_success_msg(&format!("Dump written to {}", path.display()))
                    }
                    None => print!("{}", text),
                }
                Ok(())
            }

            Commands::Launch {
                program,
                args,
                monitor,
            } => {
                let mut watch_config = WatchConfig::default();
                monitor.apply(&mut watch_config);
                watch_config.validate()?;

                let watcher = system_watcher(&watch_config, monitor.json);
                let pid = watcher.launch_process(program, args, true)?;
                output::print_success_msg(&format!("Launched {} as PID {}", program, pid));
                supervise(&watcher)
            }
        }
    }
}

/// Build a watcher over the operating system with printing callbacks
fn system_watcher(config: &WatchConfig, json: bool) -> Watcher {
    let watcher = Watcher::with_config(
        config,
        Arc::new(SystemProvider::new()),
        Arc::new(SystemController::new()),
    );

    watcher
        .on_exit(move |info| output::print_exit(info, json))
        .on_multi_tick(move |batch| output::print_tick(batch, json))
        .on_resource_limit_exceeded(move |info, limits| output::print_violation(info, limits, json))
        .on_process_created(move |pid, command| output::print_created(pid, command, json))
        .on_error(move |message, code| output::print_watch_error(message, code, json));

    watcher
}

/// Block until Ctrl-C or until the engine goes idle, then print statistics
fn supervise(watcher: &Watcher) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let mut snapshot = Snapshot::default();
    let mut last_capture = Instant::now();
    snapshot.capture(watcher);

    while watcher.is_active() && !interrupted.load(Ordering::SeqCst) {
        std::thread::sleep(SHUTDOWN_POLL);
        if last_capture.elapsed() >= SNAPSHOT_EVERY {
            snapshot.capture(watcher);
            last_capture = Instant::now();
        }
    }

    if interrupted.load(Ordering::SeqCst) {
        debug!("Interrupted, stopping");
        snapshot.capture(watcher);
    }
    watcher.stop();

    output::print_stats_table(&snapshot.processes, &snapshot.stats);
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the `-v` count.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_watch() {
        let cli = Cli::try_parse_from([
            "pidwatch",
            "-vv",
            "watch",
            "nginx",
            "--pid",
            "42",
            "--auto-restart",
            "--max-memory-kb",
            "2048",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Watch {
                names,
                pids,
                monitor,
                ..
            } => {
                assert_eq!(names, vec!["nginx".to_string()]);
                assert_eq!(pids, vec![42]);
                assert!(monitor.auto_restart);
                assert_eq!(monitor.max_memory_kb, Some(2048));
            }
            _ => panic!("expected watch command"),
        }
    }

    #[test]
    fn test_cli_parses_launch_with_hyphen_args() {
        let cli = Cli::try_parse_from(["pidwatch", "launch", "sleep", "--", "-n", "5"]).unwrap();

        match cli.command {
            Commands::Launch { program, args, .. } => {
                assert_eq!(program, "sleep");
                assert_eq!(args, vec!["-n".to_string(), "5".to_string()]);
            }
            _ => panic!("expected launch command"),
        }
    }

    #[test]
    fn test_monitor_args_override_defaults() {
        let args = MonitorArgs {
            interval_ms: Some(250),
            rate: Some(4),
            children: true,
            max_cpu: Some(75.0),
            ..MonitorArgs::default()
        };
        let mut config = WatchConfig::default();

        args.apply(&mut config);

        assert_eq!(config.defaults.update_interval_ms, 250);
        assert_eq!(config.max_updates_per_second, 4);
        assert!(config.defaults.monitor_children);
        assert!(!config.defaults.auto_restart);
        assert_eq!(config.defaults.resource_limits.max_cpu_percent, 75.0);
        assert_eq!(config.defaults.resource_limits.max_memory_kb, 0);
    }
}
