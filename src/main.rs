use colored::Colorize;
use pidwatch::cli::Cli;

fn main() {
    if let Err(e) = Cli::run() {
        eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
        std::process::exit(1);
    }
}
