//! memogardend — MemoGarden Core daemon.
//!
//! Starts the substrate in-process, runs the startup consistency sweep,
//! and serves the HTTP transport until interrupted.
use std::sync::Arc;

use clap::Parser;
use colored::*;
use memogarden_core::config::MemoGardenConfig;
use memogarden_core::core::MemoGarden;
use memogarden_core::transaction::SystemStatus;

/// MemoGarden Core — substrate daemon.
#[derive(Parser)]
#[command(name = "memogardend")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP transport to.
    #[arg(short, long)]
    bind: Option<String>,

    /// LRU-N container window size.
    #[arg(long)]
    context_size: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    memogarden_core::init_logging();

    let mut config = MemoGardenConfig::default();
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(context_size) = cli.context_size {
        config.context_size = context_size;
    }
    if let Err(err) = config.validate() {
        eprintln!("{} {}", "invalid configuration:".red().bold(), err);
        std::process::exit(1);
    }

    let garden = Arc::new(MemoGarden::new(config));
    let report = garden.init();
    match report.status {
        SystemStatus::Normal => {
            println!("{} substrate consistent", "memogardend:".green().bold());
        }
        status => {
            println!(
                "{} starting in {} ({} issue(s))",
                "memogardend:".yellow().bold(),
                status.as_str(),
                report.issues.len()
            );
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }
    println!(
        "{} listening on {}",
        "memogardend:".green().bold(),
        garden.config.bind_address
    );

    #[cfg(feature = "http")]
    {
        tokio::select! {
            result = memogarden_core::http::serve(garden) => {
                if let Err(err) = result {
                    eprintln!("{} {}", "memogardend: server error:".red().bold(), err);
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{} shutting down", "memogardend:".yellow().bold());
            }
        }
    }

    #[cfg(not(feature = "http"))]
    {
        let _ = garden;
        eprintln!("memogardend: built without the `http` feature, nothing to serve");
        std::process::exit(1);
    }
}
